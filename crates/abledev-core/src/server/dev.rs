//! Development server bootstrap.

use super::dispatch::{error_response, Gateway};
use super::port::{listen_on_available_port, BoundListener, PortRetryPolicy};
use crate::codec::{self, WireValue};
use crate::config::{GatewayConfig, RouteConfig, ServerConfig};
use crate::error::{GatewayError, InvocationError, Result};
use crate::function::{BackendFunction, HostContext, InvocationContext, RequestInfo};
use crate::modules::{ModuleLoader, ScriptModuleLoader};
use crate::resolver::OperatingMode;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Supplies the payload of `GET /dev/preview-data`.
#[async_trait]
pub trait PreviewDataProvider: Send + Sync {
    async fn preview_data(&self) -> std::result::Result<WireValue, InvocationError>;
}

/// Adapter for async closures.
pub struct PreviewFn<F>(F);

#[async_trait]
impl<F, Fut> PreviewDataProvider for PreviewFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<WireValue, InvocationError>> + Send + 'static,
{
    async fn preview_data(&self) -> std::result::Result<WireValue, InvocationError> {
        (self.0)().await
    }
}

/// Wrap an async closure as a preview provider.
pub fn preview_fn<F, Fut>(provider: F) -> Arc<dyn PreviewDataProvider>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<WireValue, InvocationError>> + Send + 'static,
{
    Arc::new(PreviewFn(provider))
}

/// Preview data produced by a backend function called without arguments.
pub struct FunctionPreview {
    function: Arc<dyn BackendFunction>,
    host_context: HostContext,
}

impl FunctionPreview {
    pub fn new(function: Arc<dyn BackendFunction>, host_context: HostContext) -> Self {
        Self {
            function,
            host_context,
        }
    }
}

#[async_trait]
impl PreviewDataProvider for FunctionPreview {
    async fn preview_data(&self) -> std::result::Result<WireValue, InvocationError> {
        let request = RequestInfo::new(
            Method::GET,
            Uri::from_static(RouteConfig::PREVIEW_DATA_PATH),
            HeaderMap::new(),
        );
        let context = InvocationContext::new(request, self.host_context.clone());
        self.function.call(WireValue::Undefined, context).await
    }
}

/// Everything needed to start a development server.
pub struct DevServerOptions {
    pub src_root: PathBuf,
    pub host: IpAddr,
    pub preferred_port: u16,
    pub port_policy: PortRetryPolicy,
    pub extension: String,
    /// Defaults to a [`ScriptModuleLoader`] rooted at `src_root`.
    pub loader: Option<Arc<dyn ModuleLoader>>,
    pub host_context: HostContext,
    pub gateway: GatewayConfig,
    pub preview: Option<Arc<dyn PreviewDataProvider>>,
}

impl DevServerOptions {
    pub fn new(src_root: impl Into<PathBuf>) -> Self {
        Self {
            src_root: src_root.into(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            preferred_port: ServerConfig::DEFAULT_PREFERRED_PORT,
            port_policy: PortRetryPolicy::default(),
            extension: ServerConfig::DEFAULT_SOURCE_EXTENSION.to_string(),
            loader: None,
            host_context: HostContext::new(),
            gateway: GatewayConfig::default(),
            preview: None,
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.preferred_port = port;
        self
    }

    pub fn with_port_policy(mut self, policy: PortRetryPolicy) -> Self {
        self.port_policy = policy;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_host_context(mut self, host_context: HostContext) -> Self {
        self.host_context = host_context;
        self
    }

    pub fn with_gateway_config(mut self, config: GatewayConfig) -> Self {
        self.gateway = config;
        self
    }

    pub fn with_preview_data(mut self, provider: Arc<dyn PreviewDataProvider>) -> Self {
        self.preview = Some(provider);
        self
    }
}

/// Start a development-mode gateway with permissive CORS and the optional
/// preview-data route.
pub async fn start_dev_server(options: DevServerOptions) -> Result<ServerHandle> {
    let DevServerOptions {
        src_root,
        host,
        preferred_port,
        port_policy,
        extension,
        loader,
        host_context,
        gateway,
        preview,
    } = options;

    let loader = loader
        .unwrap_or_else(|| Arc::new(ScriptModuleLoader::new(&src_root)) as Arc<dyn ModuleLoader>);
    let mode = OperatingMode::development_with_loader(src_root.clone(), loader)
        .with_extension(extension);
    info!("Starting development server for {}", src_root.display());

    let expose_error_details = gateway.expose_error_details;
    let gateway = Arc::new(Gateway::new(mode, host_context, gateway));
    let mut router = gateway.router();
    if let Some(provider) = preview {
        router = router.merge(preview_router(PreviewState {
            provider,
            expose_error_details,
        }));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let router = router.layer(cors);

    let bound = listen_on_available_port(host, preferred_port, port_policy).await?;
    Ok(serve(router, bound))
}

#[derive(Clone)]
struct PreviewState {
    provider: Arc<dyn PreviewDataProvider>,
    expose_error_details: bool,
}

fn preview_router(state: PreviewState) -> Router {
    Router::new()
        .route(RouteConfig::PREVIEW_DATA_PATH, get(handle_preview_data))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn handle_preview_data(State(state): State<PreviewState>) -> Response {
    let encoded = state
        .provider
        .preview_data()
        .await
        .and_then(|value| codec::encode(&value).map_err(InvocationError::from));

    match encoded {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Preview data provider failed: {}", e);
            let message = if state.expose_error_details {
                e.to_string()
            } else {
                ServerConfig::GENERIC_ERROR_MESSAGE.to_string()
            };
            error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

/// Serve a router on an already bound listener in a background task.
pub fn serve(router: Router, bound: BoundListener) -> ServerHandle {
    let BoundListener { listener, address } = bound;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            error!("Server error: {}", e);
        }
    });

    ServerHandle {
        address,
        shutdown: shutdown_tx,
        task,
    }
}

/// A running server. Dropping the handle leaves the server running until
/// the runtime shuts down; [`ServerHandle::close`] stops it gracefully.
pub struct ServerHandle {
    address: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The handle returned by [`start_dev_server`].
pub type DevServer = ServerHandle;

impl ServerHandle {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// Stop accepting connections, let in-flight requests finish and wait
    /// for the server task to end.
    pub async fn close(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.map_err(|e| GatewayError::Io {
            message: format!("Server task failed: {}", e),
            path: None,
            source: None,
        })?;
        info!("Server on {} closed", self.address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> DevServerOptions {
        DevServerOptions::new(dir.path()).with_port(0)
    }

    #[tokio::test]
    async fn test_preview_route_serves_encoded_data() {
        let dir = TempDir::new().unwrap();
        let server = start_dev_server(options(&dir).with_preview_data(preview_fn(|| async {
            Ok(WireValue::object([("todos", WireValue::Set(vec![WireValue::from("write docs")]))]))
        })))
        .await
        .unwrap();

        let url = format!("http://{}{}", server.address(), RouteConfig::PREVIEW_DATA_PATH);
        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        let value = codec::decode(&body).unwrap();
        assert_eq!(
            value.get("todos"),
            Some(&WireValue::Set(vec![WireValue::from("write docs")]))
        );

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_preview_route_absent_without_provider() {
        let dir = TempDir::new().unwrap();
        let server = start_dev_server(options(&dir)).await.unwrap();

        let url = format!("http://{}{}", server.address(), RouteConfig::PREVIEW_DATA_PATH);
        let status = reqwest::get(&url).await.unwrap().status();
        assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

        server.close().await.unwrap();
    }

    async fn failing_preview_message(config: GatewayConfig) -> String {
        let dir = TempDir::new().unwrap();
        let server = start_dev_server(
            options(&dir)
                .with_gateway_config(config)
                .with_preview_data(preview_fn(|| async {
                    Err(InvocationError::failed("fixtures missing"))
                })),
        )
        .await
        .unwrap();

        let url = format!("http://{}{}", server.address(), RouteConfig::PREVIEW_DATA_PATH);
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json().await.unwrap();
        server.close().await.unwrap();
        body["message"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_failing_preview_provider_is_500() {
        assert_eq!(
            failing_preview_message(GatewayConfig::default()).await,
            ServerConfig::GENERIC_ERROR_MESSAGE
        );
        assert_eq!(
            failing_preview_message(GatewayConfig::default().with_error_details(true)).await,
            "fixtures missing"
        );
    }

    #[tokio::test]
    async fn test_serves_script_functions_with_cors() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("queries")).unwrap();
        fs::write(
            dir.path().join("queries/ping.js"),
            "export default () => 'pong';\n",
        )
        .unwrap();
        let server = start_dev_server(options(&dir)).await.unwrap();

        let response = reqwest::Client::new()
            .get(format!(
                "http://{}/abledev/call-query?key=queries/ping",
                server.address()
            ))
            .header("origin", "http://localhost:5173")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
        let value = codec::decode(&response.text().await.unwrap()).unwrap();
        assert_eq!(value, WireValue::from("pong"));

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_releases_the_port() {
        let dir = TempDir::new().unwrap();
        let server = start_dev_server(options(&dir)).await.unwrap();
        let address = server.address();
        server.close().await.unwrap();
        assert!(tokio::net::TcpListener::bind(address).await.is_ok());
    }
}
