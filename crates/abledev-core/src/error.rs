//! Error types for the abledev gateway.
//!
//! Per-request failures (resolution, invocation, codec) are separate enums so
//! the dispatch handler can pick an HTTP status and a client message for each
//! kind. `GatewayError` wraps them together with startup failures such as
//! port binding.

use axum::http::StatusCode;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to obtain a callable for a function key.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("Function not found: {key}")]
    NotFound { key: String },

    #[error("Error importing function: {key}. Tried: {path}")]
    Import {
        key: String,
        path: PathBuf,
        /// Loader diagnostics, logged but not sent to the client.
        reason: String,
    },

    #[error("Export is not a function: {key}")]
    NotAFunction { key: String },
}

impl ResolutionError {
    /// The function key the failure refers to.
    pub fn key(&self) -> &str {
        match self {
            ResolutionError::NotFound { key }
            | ResolutionError::Import { key, .. }
            | ResolutionError::NotAFunction { key } => key,
        }
    }

    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionError::NotFound { .. } => "function-not-found",
            ResolutionError::Import { .. } => "import-error",
            ResolutionError::NotAFunction { .. } => "not-a-function",
        }
    }
}

/// Failure while running a resolved function.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("{0}")]
    Failed(String),

    #[error("Function panicked: {0}")]
    Panicked(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Invocation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Invocation task failed: {0}")]
    Join(String),
}

impl InvocationError {
    /// Build a `Failed` error from anything displayable.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        InvocationError::Failed(message.to_string())
    }
}

impl From<CodecError> for InvocationError {
    fn from(err: CodecError) -> Self {
        InvocationError::Failed(err.to_string())
    }
}

/// Failure to encode or decode wire text.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(String),

    #[error("Unknown type annotation '{annotation}' at '{path}'")]
    UnknownType { annotation: String, path: String },

    #[error("Annotation path '{0}' does not exist in the payload")]
    InvalidPath(String),

    #[error("Invalid {expected} value at '{path}': {message}")]
    InvalidValue {
        expected: &'static str,
        path: String,
        message: String,
    },
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Json(err.to_string())
    }
}

/// Failure reported by a module loader.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("Module file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read module {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to evaluate module {path}: {message}")]
    Evaluate { path: PathBuf, message: String },
}

/// Main error type for the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Missing function key")]
    MissingKey,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("No available port starting at {start} after {attempts} attempts")]
    PortsExhausted { start: u16, attempts: u32 },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl GatewayError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        GatewayError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// HTTP status used when this error ends a request.
    ///
    /// Every resolution, invocation and codec failure maps to 500. Only a
    /// request without a function key is treated as a client error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingKey => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_error_display() {
        let err = ResolutionError::Import {
            key: "queries/users".into(),
            path: PathBuf::from("/src/queries/users.js"),
            reason: "SyntaxError".into(),
        };
        assert_eq!(
            err.to_string(),
            "Error importing function: queries/users. Tried: /src/queries/users.js"
        );
        assert_eq!(err.kind(), "import-error");
        assert_eq!(err.key(), "queries/users");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::MissingKey.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GatewayError::from(ResolutionError::NotFound {
                key: "queries/x".into()
            })
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::from(InvocationError::TimedOut(Duration::from_secs(1))).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
