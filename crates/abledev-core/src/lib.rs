//! abledev core - a query/mutation gateway for backend functions.
//!
//! Functions are addressed by key (`queries/listTodos`, `mutations/addTodo`)
//! and called over two HTTP routes. Arguments and results travel in an
//! extended JSON envelope that keeps dates, sets, maps, big integers and
//! friends intact.
//!
//! In production the functions come from a fixed [`FunctionMapping`]. In
//! development they are JavaScript modules under a source directory, loaded
//! fresh on every call so edits show up without a restart.
//!
//! # Example
//!
//! ```rust,ignore
//! use abledev_core::{Gateway, GatewayConfig, HostContext, OperatingMode, FunctionMapping, WireValue};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> abledev_core::Result<()> {
//!     let mapping = FunctionMapping::new()
//!         .with_fn("queries/hello", |args, _| {
//!             let name = args.get("name").and_then(WireValue::as_str).unwrap_or("world");
//!             Ok(WireValue::from(format!("hello {}", name)))
//!         });
//!
//!     let gateway = Arc::new(Gateway::new(
//!         OperatingMode::production(mapping),
//!         HostContext::new(),
//!         GatewayConfig::default(),
//!     ));
//!     let bound = abledev_core::listen_on_available_port(
//!         "127.0.0.1".parse().unwrap(),
//!         3000,
//!         Default::default(),
//!     )
//!     .await?;
//!     let server = abledev_core::serve(gateway.router(), bound);
//!     tokio::signal::ctrl_c().await?;
//!     server.close().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod function;
pub mod modules;
pub mod resolver;
pub mod server;

pub use codec::WireValue;
pub use config::{GatewayConfig, RouteConfig, ServerConfig};
pub use error::{CodecError, GatewayError, InvocationError, LoadError, ResolutionError, Result};
pub use function::{
    async_fn, sync_fn, BackendFunction, Export, FunctionKey, FunctionKind, FunctionMapping,
    HostContext, InvocationContext, RequestInfo, ResponseHandle,
};
pub use modules::{build_mapping, discover_functions, ModuleLoader, ScriptModuleLoader};
pub use resolver::{FunctionResolver, OperatingMode};
pub use server::{
    listen_on_available_port, preview_fn, serve, start_dev_server, DevServer, DevServerOptions,
    Gateway, PortRetryPolicy, PreviewDataProvider, ServerHandle,
};
