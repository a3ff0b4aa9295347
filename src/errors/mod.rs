//! Error handling module for the sync service.
//!
//! Provides the error taxonomy shared by the cache, retry, sync and backup
//! layers, with mapping to HTTP status codes and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const REMOTE_UNAVAILABLE: &str = "REMOTE_UNAVAILABLE";
    pub const RETRY_EXHAUSTED: &str = "RETRY_EXHAUSTED";
    pub const CACHE_ERROR: &str = "CACHE_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Authentication required
    Unauthorized(String),
    /// Authenticated but not a privileged viewer
    Forbidden(String),
    /// Member id or backup timestamp absent
    NotFound(String),
    /// A field failed one of its declared rules
    Validation { field: String, message: String },
    /// Network or service hiccup on the remote record store
    Transient(String),
    /// A retried operation ran out of attempts
    RetryExhausted {
        label: String,
        attempts: u32,
        source: Box<AppError>,
    },
    /// Local cache store read/write failure
    Cache(String),
    /// Internal server error
    Internal(String),
    /// Bad request
    BadRequest(String),
}

impl AppError {
    /// Whether the retry controller should try the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }

    /// The innermost error, looking through retry wrappers.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::RetryExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Transient(_) => StatusCode::BAD_GATEWAY,
            AppError::RetryExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::Forbidden(_) => codes::FORBIDDEN,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation { .. } => codes::VALIDATION_ERROR,
            AppError::Transient(_) => codes::REMOTE_UNAVAILABLE,
            AppError::RetryExhausted { .. } => codes::RETRY_EXHAUSTED,
            AppError::Cache(_) => codes::CACHE_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Unauthorized(msg) => msg.clone(),
            AppError::Forbidden(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::Validation { field, message } => format!("{}: {}", field, message),
            AppError::Transient(msg) => msg.clone(),
            AppError::RetryExhausted {
                label,
                attempts,
                source,
            } => format!(
                "{} failed after {} attempts: {}",
                label,
                attempts,
                source.message()
            ),
            AppError::Cache(msg) => msg.clone(),
            AppError::Internal(msg) => msg.clone(),
            AppError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::RetryExhausted { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::warn!("Cache store error: {:?}", err);
        AppError::Cache(format!("Cache store error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        tracing::warn!("Remote store error: {:?}", err);
        if err.is_decode() {
            return AppError::Internal(format!("Malformed remote document: {}", err));
        }
        match err.status() {
            Some(status) if is_permanent_rejection(status) => {
                AppError::BadRequest(format!("Remote store rejected the request: {}", err))
            }
            _ => AppError::Transient(format!("Remote store error: {}", err)),
        }
    }
}

/// 4xx answers other than timeouts and rate limiting will not change on retry.
fn is_permanent_rejection(status: reqwest::StatusCode) -> bool {
    status.is_client_error()
        && status != reqwest::StatusCode::REQUEST_TIMEOUT
        && status != reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &AppError) -> Self {
        let details = match error {
            AppError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            AppError::RetryExhausted {
                label, attempts, ..
            } => Some(serde_json::json!({ "operation": label, "attempts": attempts })),
            _ => None,
        };

        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(&self);
        (status, Json(body)).into_response()
    }
}
