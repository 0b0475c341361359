//! Function resolution: turn a key into something callable.
//!
//! The operating mode is chosen once per gateway and converted into a
//! [`FunctionResolver`]; the dispatch handler only ever sees the trait.

mod development;
mod production;

pub use development::DevelopmentResolver;
pub use production::StaticResolver;

use crate::config::ServerConfig;
use crate::error::ResolutionError;
use crate::function::{BackendFunction, FunctionKey, FunctionMapping};
use crate::modules::{ModuleLoader, ScriptModuleLoader};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Resolves function keys. Never panics; every failure is a value.
#[async_trait]
pub trait FunctionResolver: Send + Sync {
    async fn resolve(
        &self,
        key: &FunctionKey,
    ) -> Result<Arc<dyn BackendFunction>, ResolutionError>;

    /// `"production"` or `"development"`, for logs.
    fn mode_name(&self) -> &'static str;
}

/// How a gateway finds its functions.
pub enum OperatingMode {
    /// Fixed mapping built at startup.
    Production { mapping: FunctionMapping },
    /// Source files loaded fresh on every call.
    Development {
        src_root: PathBuf,
        loader: Arc<dyn ModuleLoader>,
        extension: String,
    },
}

impl OperatingMode {
    pub fn production(mapping: FunctionMapping) -> Self {
        OperatingMode::Production { mapping }
    }

    /// Development mode backed by the script loader.
    pub fn development(src_root: impl Into<PathBuf>) -> Self {
        let src_root = src_root.into();
        let loader = Arc::new(ScriptModuleLoader::new(&src_root));
        Self::development_with_loader(src_root, loader)
    }

    /// Development mode with an injected loader.
    pub fn development_with_loader(
        src_root: impl Into<PathBuf>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        OperatingMode::Development {
            src_root: src_root.into(),
            loader,
            extension: ServerConfig::DEFAULT_SOURCE_EXTENSION.to_string(),
        }
    }

    /// Change the source file extension. No effect in production.
    pub fn with_extension(mut self, new_extension: impl Into<String>) -> Self {
        if let OperatingMode::Development { extension, .. } = &mut self {
            *extension = new_extension.into().trim_start_matches('.').to_string();
        }
        self
    }

    pub fn is_development(&self) -> bool {
        matches!(self, OperatingMode::Development { .. })
    }

    pub fn into_resolver(self) -> Arc<dyn FunctionResolver> {
        match self {
            OperatingMode::Production { mapping } => Arc::new(StaticResolver::new(mapping)),
            OperatingMode::Development {
                src_root,
                loader,
                extension,
            } => Arc::new(DevelopmentResolver::new(src_root, loader, extension)),
        }
    }
}

impl std::fmt::Debug for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatingMode::Production { mapping } => f
                .debug_struct("Production")
                .field("functions", &mapping.len())
                .finish(),
            OperatingMode::Development {
                src_root,
                extension,
                ..
            } => f
                .debug_struct("Development")
                .field("src_root", src_root)
                .field("extension", extension)
                .finish(),
        }
    }
}
