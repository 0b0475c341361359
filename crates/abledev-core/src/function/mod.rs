//! Backend functions: the callable trait, keys, mappings and call context.

mod context;
mod key;
mod mapping;

pub use context::{HostContext, InvocationContext, RequestInfo, ResponseHandle};
pub use key::{FunctionKey, FunctionKind};
pub use mapping::FunctionMapping;

use crate::codec::WireValue;
use crate::error::InvocationError;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A callable backend function.
///
/// Implementations may finish immediately or suspend; the dispatcher awaits
/// either way. An `Err` (or a panic) turns into an HTTP 500 for that call only.
#[async_trait]
pub trait BackendFunction: Send + Sync {
    async fn call(
        &self,
        args: WireValue,
        context: InvocationContext,
    ) -> Result<WireValue, InvocationError>;
}

/// What a function key points at before the callable check.
#[derive(Clone)]
pub enum Export {
    Function(Arc<dyn BackendFunction>),
    /// A present but non-callable export, e.g. a module whose default export
    /// is an object.
    Value(WireValue),
}

impl Export {
    pub fn function(function: impl BackendFunction + 'static) -> Self {
        Export::Function(Arc::new(function))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Export::Function(_))
    }

    pub fn into_callable(self) -> Option<Arc<dyn BackendFunction>> {
        match self {
            Export::Function(function) => Some(function),
            Export::Value(_) => None,
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Export::Function(_) => f.write_str("Export::Function(..)"),
            Export::Value(value) => f.debug_tuple("Export::Value").field(value).finish(),
        }
    }
}

/// Adapter for closures returning a future.
pub struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> BackendFunction for AsyncFn<F>
where
    F: Fn(WireValue, InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<WireValue, InvocationError>> + Send + 'static,
{
    async fn call(
        &self,
        args: WireValue,
        context: InvocationContext,
    ) -> Result<WireValue, InvocationError> {
        (self.0)(args, context).await
    }
}

/// Adapter for plain synchronous closures.
pub struct SyncFn<F>(F);

#[async_trait]
impl<F> BackendFunction for SyncFn<F>
where
    F: Fn(WireValue, &InvocationContext) -> Result<WireValue, InvocationError> + Send + Sync,
{
    async fn call(
        &self,
        args: WireValue,
        context: InvocationContext,
    ) -> Result<WireValue, InvocationError> {
        (self.0)(args, &context)
    }
}

/// Wrap an async closure as a backend function.
pub fn async_fn<F, Fut>(function: F) -> Export
where
    F: Fn(WireValue, InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WireValue, InvocationError>> + Send + 'static,
{
    Export::function(AsyncFn(function))
}

/// Wrap a synchronous closure as a backend function.
pub fn sync_fn<F>(function: F) -> Export
where
    F: Fn(WireValue, &InvocationContext) -> Result<WireValue, InvocationError>
        + Send
        + Sync
        + 'static,
{
    Export::function(SyncFn(function))
}
