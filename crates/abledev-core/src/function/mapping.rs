//! Static function-key to implementation mapping used in production.

use super::{async_fn, sync_fn, Export, FunctionKey, InvocationContext};
use crate::codec::WireValue;
use crate::error::InvocationError;
use std::collections::HashMap;
use std::future::Future;

/// Ordered mapping with unique keys.
///
/// Inserting a key twice keeps the later export (last write wins) at the
/// position where the key was first inserted.
#[derive(Clone, Default)]
pub struct FunctionMapping {
    entries: Vec<(FunctionKey, Export)>,
    index: HashMap<FunctionKey, usize>,
}

impl FunctionMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an export, returning the one it replaced.
    pub fn insert(&mut self, key: impl Into<FunctionKey>, export: Export) -> Option<Export> {
        let key = key.into();
        match self.index.get(&key) {
            Some(&position) => Some(std::mem::replace(&mut self.entries[position].1, export)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, export));
                None
            }
        }
    }

    /// Builder-style [`FunctionMapping::insert`].
    pub fn with(mut self, key: impl Into<FunctionKey>, export: Export) -> Self {
        self.insert(key, export);
        self
    }

    /// Register a synchronous closure.
    pub fn with_fn<F>(self, key: impl Into<FunctionKey>, function: F) -> Self
    where
        F: Fn(WireValue, &InvocationContext) -> Result<WireValue, InvocationError>
            + Send
            + Sync
            + 'static,
    {
        self.with(key, sync_fn(function))
    }

    /// Register an async closure.
    pub fn with_async_fn<F, Fut>(self, key: impl Into<FunctionKey>, function: F) -> Self
    where
        F: Fn(WireValue, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WireValue, InvocationError>> + Send + 'static,
    {
        self.with(key, async_fn(function))
    }

    pub fn get(&self, key: &str) -> Option<&Export> {
        self.index.get(key).map(|&position| &self.entries[position].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &FunctionKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<FunctionKey>> FromIterator<(K, Export)> for FunctionMapping {
    fn from_iter<I: IntoIterator<Item = (K, Export)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        for (key, export) in iter {
            mapping.insert(key, export);
        }
        mapping
    }
}

impl std::fmt::Debug for FunctionMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(n: i32) -> Export {
        sync_fn(move |_, _| Ok(WireValue::from(n)))
    }

    #[test]
    fn test_insertion_order() {
        let mapping = FunctionMapping::new()
            .with("queries/b", constant(1))
            .with("queries/a", constant(2))
            .with("mutations/c", constant(3));
        let keys: Vec<_> = mapping.keys().map(FunctionKey::as_str).collect();
        assert_eq!(keys, vec!["queries/b", "queries/a", "mutations/c"]);
    }

    #[test]
    fn test_duplicate_keys_last_write_wins() {
        let mut mapping = FunctionMapping::new();
        assert!(mapping.insert("queries/x", constant(1)).is_none());
        mapping.insert("queries/y", constant(9));
        let replaced = mapping.insert("queries/x", Export::Value(WireValue::from("late")));

        assert!(replaced.map(|e| e.is_callable()).unwrap_or(false));
        assert_eq!(mapping.len(), 2);
        assert!(matches!(
            mapping.get("queries/x"),
            Some(Export::Value(WireValue::String(s))) if s == "late"
        ));
        assert_eq!(mapping.keys().next().map(FunctionKey::as_str), Some("queries/x"));
    }

    #[test]
    fn test_from_iterator_dedups() {
        let mapping: FunctionMapping = vec![
            ("queries/x", constant(1)),
            ("queries/x", Export::Value(WireValue::Null)),
        ]
        .into_iter()
        .collect();
        assert_eq!(mapping.len(), 1);
        assert!(!mapping.get("queries/x").map(Export::is_callable).unwrap_or(true));
    }
}
