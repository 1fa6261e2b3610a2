use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::proxy::retry::{FailureKind, OperationError};
use crate::transcript::FetchError;

/// Unified error type for the transcript relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Proxy errors
    #[error("All proxies exhausted after {attempts} attempts")]
    ProxyPoolExhausted { attempts: u32 },

    #[error("Upstream rate limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },

    #[error("Upstream connection failed after {attempts} attempts: {message}")]
    ConnectionFailed { attempts: u32, message: String },

    // Transcript errors
    #[error("Could not retrieve transcript: {0}")]
    TranscriptNotFound(String),

    #[error("Transcript language unavailable: {0}")]
    LanguageUnavailable(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Seconds a client should wait before retrying a temporarily unavailable request
const RETRY_AFTER_SECS: &str = "30";

impl RelayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            RelayError::TranscriptNotFound(_) | RelayError::LanguageUnavailable(_) => {
                StatusCode::NOT_FOUND
            }

            // 502 Bad Gateway
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            RelayError::ProxyPoolExhausted { .. }
            | RelayError::RateLimited { .. }
            | RelayError::ConnectionFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            RelayError::InvalidConfig(_) | RelayError::Io(_) | RelayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable tag for the error body
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidConfig(_) => "configuration_error",
            RelayError::ProxyPoolExhausted { .. } => "proxy_pool_exhausted",
            RelayError::RateLimited { .. } => "rate_limited",
            RelayError::ConnectionFailed { .. } => "connection_error",
            RelayError::TranscriptNotFound(_) => "not_found",
            RelayError::LanguageUnavailable(_) => "language_unavailable",
            RelayError::Upstream(_) => "upstream_error",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::Io(_) | RelayError::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller may succeed by retrying the same request later
    pub fn is_retryable(&self) -> bool {
        self.status_code() == StatusCode::SERVICE_UNAVAILABLE
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<OperationError> for RelayError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::PoolExhausted { attempts } => {
                RelayError::ProxyPoolExhausted { attempts }
            }
            OperationError::Failed {
                kind,
                message,
                attempts,
            } => match kind {
                FailureKind::RateLimited => RelayError::RateLimited { attempts, message },
                FailureKind::ConnectionError => RelayError::ConnectionFailed { attempts, message },
                FailureKind::NotFound => RelayError::TranscriptNotFound(message),
                FailureKind::LanguageUnavailable => RelayError::LanguageUnavailable(message),
                FailureKind::Other => RelayError::Upstream(message),
            },
        }
    }
}

// Direct-mode fetches make exactly one attempt
impl From<FetchError> for RelayError {
    fn from(err: FetchError) -> Self {
        OperationError::Failed {
            kind: err.kind(),
            message: err.message().to_string(),
            attempts: 1,
        }
        .into()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retryable = self.is_retryable();
        if self.is_server_error() {
            warn!("Request failed with {}: {}", status.as_u16(), self);
        } else if self.is_client_error() {
            debug!("Request rejected with {}: {}", status.as_u16(), self);
        }
        let body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });

        let mut response = (status, Json(body)).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::InvalidConfig(err.to_string())
    }
}
