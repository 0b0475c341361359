//! Centralized configuration for the gateway.
//!
//! Route paths and server defaults live in constant holder structs; the
//! per-instance knobs are in [`GatewayConfig`].

use std::time::Duration;

/// HTTP route paths.
pub struct RouteConfig;

impl RouteConfig {
    pub const CALL_QUERY_PATH: &'static str = "/abledev/call-query";
    pub const CALL_MUTATION_PATH: &'static str = "/abledev/call-mutation";
    pub const PREVIEW_DATA_PATH: &'static str = "/dev/preview-data";
    /// Query-string parameter carrying the function key.
    pub const KEY_PARAM: &'static str = "key";
}

/// Server and loader defaults.
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_PREFERRED_PORT: u16 = 3000;
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_SOURCE_EXTENSION: &'static str = "js";
    pub const QUERIES_DIR_NAME: &'static str = "queries";
    pub const MUTATIONS_DIR_NAME: &'static str = "mutations";
    pub const GENERIC_ERROR_MESSAGE: &'static str = "Internal server error";
}

/// Per-gateway settings.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Prefix under which the call routes are mounted (e.g. `/api`).
    /// Empty means the routes sit at the root.
    pub base_path: String,
    /// Upper bound for a single invocation. `None` waits forever.
    pub invocation_timeout: Option<Duration>,
    /// Send invocation error details to the client instead of the generic
    /// message.
    pub expose_error_details: bool,
}

impl GatewayConfig {
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = Some(timeout);
        self
    }

    pub fn with_error_details(mut self, expose: bool) -> Self {
        self.expose_error_details = expose;
        self
    }

    /// Base path normalized to either empty or `/segment(/segment)*`.
    pub fn normalized_base_path(&self) -> String {
        let trimmed = self.base_path.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_base_path() {
        assert_eq!(GatewayConfig::default().normalized_base_path(), "");
        assert_eq!(
            GatewayConfig::default().with_base_path("/").normalized_base_path(),
            ""
        );
        assert_eq!(
            GatewayConfig::default().with_base_path("api/v1/").normalized_base_path(),
            "/api/v1"
        );
    }
}
