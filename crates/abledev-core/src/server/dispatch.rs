//! The call handler: key extraction, resolution, invocation and encoding.

use crate::codec::{self, WireValue};
use crate::config::{GatewayConfig, RouteConfig, ServerConfig};
use crate::error::{CodecError, GatewayError, InvocationError, ResolutionError};
use crate::function::{FunctionKey, FunctionKind, HostContext, InvocationContext, RequestInfo};
use crate::resolver::{FunctionResolver, OperatingMode};
use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info_span, warn, Instrument};

/// Body of every failed call.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Raw arguments as they arrived, before decoding.
#[derive(Debug, Clone)]
pub enum RawArguments {
    /// Query-string pairs in arrival order (the `key` pair included).
    Query(Vec<(String, String)>),
    /// Codec text from a request body.
    Body(Bytes),
}

/// One incoming call, independent of the HTTP framework.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub kind: FunctionKind,
    pub key: Option<String>,
    pub arguments: RawArguments,
    pub request: RequestInfo,
}

impl FunctionCall {
    /// Query call: the key and the arguments both come from the query string.
    pub fn query(request: RequestInfo) -> Self {
        Self {
            kind: FunctionKind::Query,
            key: request.query_param(RouteConfig::KEY_PARAM).map(str::to_string),
            arguments: RawArguments::Query(request.query.clone()),
            request,
        }
    }

    /// Mutation call: the key comes from the query string, the arguments from
    /// the body.
    pub fn mutation(request: RequestInfo, body: Bytes) -> Self {
        Self {
            kind: FunctionKind::Mutation,
            key: request.query_param(RouteConfig::KEY_PARAM).map(str::to_string),
            arguments: RawArguments::Body(body),
            request,
        }
    }
}

/// The gateway: a resolver plus the settings every call shares.
pub struct Gateway {
    resolver: Arc<dyn FunctionResolver>,
    host_context: HostContext,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(mode: OperatingMode, host_context: HostContext, config: GatewayConfig) -> Self {
        Self::with_resolver(mode.into_resolver(), host_context, config)
    }

    pub fn with_resolver(
        resolver: Arc<dyn FunctionResolver>,
        host_context: HostContext,
        config: GatewayConfig,
    ) -> Self {
        Self {
            resolver,
            host_context,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn mode_name(&self) -> &'static str {
        self.resolver.mode_name()
    }

    /// Router with both call routes, mounted under the configured base path.
    pub fn router(self: Arc<Self>) -> Router {
        let base_path = self.config.normalized_base_path();
        let routes = Router::new()
            .route(RouteConfig::CALL_QUERY_PATH, get(handle_call_query))
            .route(RouteConfig::CALL_MUTATION_PATH, post(handle_call_mutation))
            .with_state(self);

        let router = if base_path.is_empty() {
            routes
        } else {
            Router::new().nest(&base_path, routes)
        };
        router.layer(TraceLayer::new_for_http())
    }

    /// Run one call end to end and build the HTTP response.
    pub async fn handle_call(&self, call: FunctionCall) -> Response {
        let FunctionCall {
            kind,
            key,
            arguments,
            request,
        } = call;

        let Some(key) = key.filter(|k| !k.is_empty()).map(FunctionKey::new) else {
            warn!("Rejected {} call without a function key", kind);
            let err = GatewayError::MissingKey;
            return error_response(err.status_code(), err.to_string());
        };

        let args = match decode_arguments(arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!("Invalid arguments for {} {}: {}", kind, key, e);
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Invalid arguments for {}: {}", kind, key),
                );
            }
        };

        let function = match self.resolver.resolve(&key).await {
            Ok(function) => function,
            Err(e) => {
                match &e {
                    ResolutionError::Import { reason, .. } => {
                        error!("{} ({})", e, reason);
                    }
                    _ => warn!("{} [{}]", e, e.kind()),
                }
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    resolution_message(kind, &e),
                );
            }
        };

        let context = InvocationContext::new(request, self.host_context.clone());
        let response_handle = context.response.clone();
        let span = info_span!(
            "call",
            kind = kind.as_str(),
            key = key.as_str(),
            request_id = %context.request_id
        );

        let outcome = self.invoke(function.call(args, context)).instrument(span.clone()).await;

        let encoded = outcome.and_then(|value| codec::encode(&value).map_err(InvocationError::from));
        match encoded {
            Ok(body) => {
                let mut response = (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    body,
                )
                    .into_response();
                response.headers_mut().extend(response_handle.take_headers());
                response
            }
            Err(e) => {
                error!(parent: &span, "Invocation of {} failed: {}", key, e);
                let message = if self.config.expose_error_details {
                    e.to_string()
                } else {
                    ServerConfig::GENERIC_ERROR_MESSAGE.to_string()
                };
                error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        }
    }

    /// Await an invocation, turning panics and timeouts into errors.
    async fn invoke<F>(&self, call: F) -> Result<WireValue, InvocationError>
    where
        F: std::future::Future<Output = Result<WireValue, InvocationError>>,
    {
        let started = Instant::now();
        let guarded = AssertUnwindSafe(call).catch_unwind();

        let caught = match self.config.invocation_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(caught) => caught,
                Err(_) => return Err(InvocationError::TimedOut(limit)),
            },
            None => guarded.await,
        };

        let result = caught
            .unwrap_or_else(|payload| Err(InvocationError::Panicked(panic_message(&*payload))));
        debug!("Invocation finished in {:?}", started.elapsed());
        result
    }
}

async fn handle_call_query(
    State(gateway): State<Arc<Gateway>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request = RequestInfo::new(method, uri, headers);
    gateway.handle_call(FunctionCall::query(request)).await
}

async fn handle_call_mutation(
    State(gateway): State<Arc<Gateway>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RequestInfo::new(method, uri, headers);
    gateway.handle_call(FunctionCall::mutation(request, body)).await
}

/// Query arguments become an object of strings, last value winning; the body
/// is decoded with the wire codec.
fn decode_arguments(arguments: RawArguments) -> Result<WireValue, GatewayError> {
    match arguments {
        RawArguments::Query(pairs) => {
            let fields: BTreeMap<String, WireValue> = pairs
                .into_iter()
                .filter(|(name, _)| name != RouteConfig::KEY_PARAM)
                .map(|(name, value)| (name, WireValue::String(value)))
                .collect();
            Ok(WireValue::Object(fields))
        }
        RawArguments::Body(body) => {
            let text = std::str::from_utf8(&body)
                .map_err(|e| GatewayError::Codec(CodecError::Json(e.to_string())))?;
            Ok(codec::decode(text)?)
        }
    }
}

fn resolution_message(kind: FunctionKind, err: &ResolutionError) -> String {
    match err {
        ResolutionError::NotAFunction { key } => format!("{} is not a function: {}", kind, key),
        other => other.to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorBody { message })).into_response()
}
