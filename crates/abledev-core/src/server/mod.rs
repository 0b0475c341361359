//! HTTP surface: the call handler, port allocation and the dev server.

mod dev;
mod dispatch;
mod port;

pub use dev::{
    preview_fn, serve, start_dev_server, DevServer, DevServerOptions, FunctionPreview,
    PreviewDataProvider, PreviewFn, ServerHandle,
};
pub use dispatch::{ErrorBody, FunctionCall, Gateway, RawArguments};
pub use port::{listen_on_available_port, BoundListener, PortRetryPolicy};
