//! Function keys and call kinds.

use crate::config::ServerConfig;
use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;

/// Whether a call came in through the query or the mutation route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Query,
    Mutation,
}

impl FunctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Query => "query",
            FunctionKind::Mutation => "mutation",
        }
    }

    /// Directory that holds functions of this kind, by convention.
    pub fn dir_name(&self) -> &'static str {
        match self {
            FunctionKind::Query => ServerConfig::QUERIES_DIR_NAME,
            FunctionKind::Mutation => ServerConfig::MUTATIONS_DIR_NAME,
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a backend function, e.g. `queries/listTodos`.
///
/// The key is only a convention-bearing string; nothing forces the `queries/`
/// or `mutations/` prefix to match the route a call arrives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey(String);

impl FunctionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind implied by the key's namespace prefix, if any.
    pub fn kind(&self) -> Option<FunctionKind> {
        let (namespace, _) = self.0.split_once('/')?;
        match namespace {
            ServerConfig::QUERIES_DIR_NAME => Some(FunctionKind::Query),
            ServerConfig::MUTATIONS_DIR_NAME => Some(FunctionKind::Mutation),
            _ => None,
        }
    }

    /// Relative source path for this key, `None` if the key could escape the
    /// source root or does not name a file.
    pub fn relative_path(&self, extension: &str) -> Option<PathBuf> {
        if self.0.is_empty() || self.0.starts_with('/') || self.0.contains('\\') {
            return None;
        }

        let mut path = PathBuf::new();
        for segment in self.0.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains(':') {
                return None;
            }
            path.push(segment);
        }

        let mut file_name = path.file_name()?.to_os_string();
        if !extension.is_empty() {
            file_name.push(".");
            file_name.push(extension);
        }
        path.set_file_name(file_name);
        Some(path)
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for FunctionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FunctionKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FunctionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}
