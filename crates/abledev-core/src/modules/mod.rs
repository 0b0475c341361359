//! Source modules: loading function files from disk in development mode.
//!
//! A [`ModuleLoader`] owns a per-path cache. The development resolver drops
//! the cached entry for a path right before loading it, so every request sees
//! the file as it is on disk at that moment.

mod bridge;
mod discovery;
mod script;

pub use bridge::{from_bridge_json, to_bridge_json, BRIDGE_PRELUDE};
pub use discovery::{build_mapping, discover_functions};
pub use script::{ScriptFunction, ScriptModuleLoader};

use crate::error::LoadError;
use crate::function::Export;
use async_trait::async_trait;
use std::path::Path;

/// Loads source modules and caches them by path.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Drop the cached module for `path`. Returns whether anything was cached.
    fn invalidate(&self, path: &Path) -> bool;

    /// Load the module at `path` and return its default export.
    async fn load(&self, path: &Path) -> Result<Export, LoadError>;
}
