//! Per-invocation context handed to every backend function.

use crate::codec::WireValue;
use crate::error::{GatewayError, Result};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Read-only snapshot of the incoming HTTP request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Decoded query-string pairs in arrival order, including `key`.
    pub query: Vec<(String, String)>,
}

impl RequestInfo {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        let query = uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        Self {
            method,
            uri,
            headers,
            query,
        }
    }

    /// Last value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Request snapshot as a wire object, as handed to script functions.
    pub fn to_wire(&self) -> WireValue {
        let headers = self
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), WireValue::from(v)))
            });
        let query = self
            .query
            .iter()
            .map(|(k, v)| (k.clone(), WireValue::from(v.as_str())));

        WireValue::object([
            ("method", WireValue::from(self.method.as_str())),
            ("url", WireValue::from(self.uri.to_string())),
            ("path", WireValue::from(self.uri.path())),
            ("headers", WireValue::object(headers)),
            ("query", WireValue::object(query)),
        ])
    }
}

/// Lets a function add headers to its successful response.
#[derive(Debug, Clone, Default)]
pub struct ResponseHandle {
    headers: Arc<Mutex<HeaderMap>>,
}

impl ResponseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing earlier values.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().insert(name, value);
    }

    /// Add a header value, keeping earlier ones (e.g. several `set-cookie`).
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().append(name, value);
    }

    pub(crate) fn take_headers(&self) -> HeaderMap {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeaderMap> {
        // A panicking function may poison the lock; the headers are still usable.
        self.headers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Auxiliary data injected by the embedding application.
///
/// `request` and `response` are reserved for the base handles and can never
/// be shadowed by host data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostContext {
    values: BTreeMap<String, WireValue>,
}

impl HostContext {
    pub const RESERVED_KEYS: [&'static str; 2] = ["request", "response"];

    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value. Fails for reserved keys.
    pub fn insert(&mut self, key: impl Into<String>, value: WireValue) -> Result<Option<WireValue>> {
        let key = key.into();
        if Self::RESERVED_KEYS.contains(&key.as_str()) {
            return Err(GatewayError::Config {
                message: format!("Host context key '{}' is reserved", key),
            });
        }
        Ok(self.values.insert(key, value))
    }

    /// Builder-style [`HostContext::insert`].
    pub fn with(mut self, key: impl Into<String>, value: WireValue) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Build from a wire object, e.g. one parsed from configuration.
    pub fn from_wire(value: WireValue) -> Result<Self> {
        match value {
            WireValue::Object(map) => {
                let mut context = Self::new();
                for (key, value) in map {
                    context.insert(key, value)?;
                }
                Ok(context)
            }
            WireValue::Undefined | WireValue::Null => Ok(Self::new()),
            _ => Err(GatewayError::Config {
                message: "Host context must be an object".to_string(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WireValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything a function receives besides its arguments.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub request_id: Uuid,
    pub request: RequestInfo,
    pub response: ResponseHandle,
    pub host: HostContext,
}

impl InvocationContext {
    pub fn new(request: RequestInfo, host: HostContext) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            request,
            response: ResponseHandle::new(),
            host,
        }
    }

    /// Merged view: host fields first, then the base `request` handle, which
    /// therefore always wins.
    pub fn to_wire(&self) -> WireValue {
        let mut merged: BTreeMap<String, WireValue> = self
            .host
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        merged.insert("request".to_string(), self.request.to_wire());
        WireValue::Object(merged)
    }
}
