use super::FunctionResolver;
use crate::error::ResolutionError;
use crate::function::{BackendFunction, FunctionKey, FunctionMapping};
use async_trait::async_trait;
use std::sync::Arc;

/// Looks keys up in an immutable mapping.
pub struct StaticResolver {
    mapping: Arc<FunctionMapping>,
}

impl StaticResolver {
    pub fn new(mapping: FunctionMapping) -> Self {
        Self {
            mapping: Arc::new(mapping),
        }
    }

    pub fn mapping(&self) -> &FunctionMapping {
        &self.mapping
    }
}

#[async_trait]
impl FunctionResolver for StaticResolver {
    async fn resolve(
        &self,
        key: &FunctionKey,
    ) -> Result<Arc<dyn BackendFunction>, ResolutionError> {
        let export = self
            .mapping
            .get(key.as_str())
            .ok_or_else(|| ResolutionError::NotFound {
                key: key.to_string(),
            })?;

        export
            .clone()
            .into_callable()
            .ok_or_else(|| ResolutionError::NotAFunction {
                key: key.to_string(),
            })
    }

    fn mode_name(&self) -> &'static str {
        "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireValue;
    use crate::function::Export;

    fn mapping() -> FunctionMapping {
        FunctionMapping::new()
            .with_fn("queries/simple", |_, _| Ok(WireValue::from(1)))
            .with("queries/config", Export::Value(WireValue::from("not callable")))
    }

    #[tokio::test]
    async fn test_resolves_registered_function() {
        let resolver = StaticResolver::new(mapping());
        assert!(resolver.resolve(&"queries/simple".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let resolver = StaticResolver::new(mapping());
        let err = resolver.resolve(&"queries/missing".into()).await.err();
        assert!(matches!(
            err,
            Some(ResolutionError::NotFound { key }) if key == "queries/missing"
        ));
    }

    #[tokio::test]
    async fn test_value_export_is_not_a_function() {
        let resolver = StaticResolver::new(mapping());
        let err = resolver.resolve(&"queries/config".into()).await.err();
        assert!(matches!(err, Some(ResolutionError::NotAFunction { .. })));
    }
}
