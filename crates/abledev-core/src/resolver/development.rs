use super::FunctionResolver;
use crate::error::ResolutionError;
use crate::function::{BackendFunction, FunctionKey};
use crate::modules::ModuleLoader;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Loads `<src_root>/<key>.<extension>` on every call.
///
/// The cached module for the path is invalidated before each load, so an edit
/// on disk is visible to the very next request.
pub struct DevelopmentResolver {
    src_root: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    extension: String,
}

impl DevelopmentResolver {
    pub fn new(src_root: PathBuf, loader: Arc<dyn ModuleLoader>, extension: String) -> Self {
        Self {
            src_root,
            loader,
            extension,
        }
    }

    pub fn src_root(&self) -> &Path {
        &self.src_root
    }

    /// Source path for a key, `None` when the key cannot name a file under
    /// the source root.
    pub fn source_path(&self, key: &FunctionKey) -> Option<PathBuf> {
        key.relative_path(&self.extension)
            .map(|relative| self.src_root.join(relative))
    }
}

#[async_trait]
impl FunctionResolver for DevelopmentResolver {
    async fn resolve(
        &self,
        key: &FunctionKey,
    ) -> Result<Arc<dyn BackendFunction>, ResolutionError> {
        let Some(path) = self.source_path(key) else {
            warn!("Rejected function key outside the source root: {:?}", key.as_str());
            return Err(ResolutionError::NotFound {
                key: key.to_string(),
            });
        };

        if self.loader.invalidate(&path) {
            debug!("Invalidated cached module {}", path.display());
        }

        let export = self
            .loader
            .load(&path)
            .await
            .map_err(|e| ResolutionError::Import {
                key: key.to_string(),
                path: path.clone(),
                reason: e.to_string(),
            })?;

        export
            .into_callable()
            .ok_or_else(|| ResolutionError::NotAFunction {
                key: key.to_string(),
            })
    }

    fn mode_name(&self) -> &'static str {
        "development"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireValue;
    use crate::error::LoadError;
    use crate::function::{sync_fn, Export};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Loader that records every cache operation and serves canned exports.
    #[derive(Default)]
    struct RecordingLoader {
        exports: HashMap<PathBuf, Export>,
        cached: Mutex<Vec<PathBuf>>,
        events: Mutex<Vec<String>>,
    }

    impl RecordingLoader {
        fn with_export(mut self, path: &Path, export: Export) -> Self {
            self.exports.insert(path.to_path_buf(), export);
            self
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModuleLoader for RecordingLoader {
        fn invalidate(&self, path: &Path) -> bool {
            self.events
                .lock()
                .unwrap()
                .push(format!("invalidate {}", path.display()));
            let mut cached = self.cached.lock().unwrap();
            let before = cached.len();
            cached.retain(|p| p != path);
            before != cached.len()
        }

        async fn load(&self, path: &Path) -> Result<Export, LoadError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("load {}", path.display()));
            self.cached.lock().unwrap().push(path.to_path_buf());
            self.exports
                .get(path)
                .cloned()
                .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))
        }
    }

    fn src_root() -> PathBuf {
        PathBuf::from("/srv/app/src")
    }

    #[tokio::test]
    async fn test_invalidates_before_every_load() {
        let path = src_root().join("queries").join("simple.js");
        let loader = Arc::new(
            RecordingLoader::default()
                .with_export(&path, sync_fn(|_, _| Ok(WireValue::from(1)))),
        );
        let resolver = DevelopmentResolver::new(src_root(), loader.clone(), "js".into());

        let key = FunctionKey::from("queries/simple");
        assert!(resolver.resolve(&key).await.is_ok());
        assert!(resolver.resolve(&key).await.is_ok());

        let shown = path.display().to_string();
        assert_eq!(
            loader.events(),
            vec![
                format!("invalidate {shown}"),
                format!("load {shown}"),
                format!("invalidate {shown}"),
                format!("load {shown}"),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_failure_is_import_error_with_path() {
        let resolver =
            DevelopmentResolver::new(src_root(), Arc::new(RecordingLoader::default()), "js".into());
        let err = resolver.resolve(&"queries/missing".into()).await.err();
        match err {
            Some(ResolutionError::Import { key, path, .. }) => {
                assert_eq!(key, "queries/missing");
                assert_eq!(path, src_root().join("queries").join("missing.js"));
            }
            other => panic!("expected import error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_callable_default_export() {
        let path = src_root().join("queries").join("settings.ts");
        let loader = Arc::new(
            RecordingLoader::default().with_export(&path, Export::Value(WireValue::from(42))),
        );
        let resolver = DevelopmentResolver::new(src_root(), loader, "ts".into());
        let err = resolver.resolve(&"queries/settings".into()).await.err();
        assert!(matches!(err, Some(ResolutionError::NotAFunction { .. })));
    }

    #[tokio::test]
    async fn test_escaping_key_never_reaches_loader() {
        let loader = Arc::new(RecordingLoader::default());
        let resolver = DevelopmentResolver::new(src_root(), loader.clone(), "js".into());
        let err = resolver.resolve(&"../../etc/passwd".into()).await.err();
        assert!(matches!(err, Some(ResolutionError::NotFound { .. })));
        assert!(loader.events().is_empty());
    }
}
