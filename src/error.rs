//! Error types for the caching and rate-limiting layer
//!
//! Infrastructure faults (`StoreError`) are swallowed by the components that
//! depend on the store. `AppError` is what reaches the HTTP layer.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Store Error Enum ==
/// Failures talking to the shared key-value store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No session is established (never connected, lost, or shut down)
    #[error("Key-value store unavailable")]
    Unavailable,

    /// A store call did not complete within the configured bound
    #[error("Key-value store call timed out after {0}ms")]
    Timeout(u64),

    /// Connection attempts exhausted
    #[error("Failed to connect to key-value store after {attempts} attempts")]
    ConnectFailed { attempts: u32 },

    /// Error reported by the Redis client
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Operation not valid for the stored value (e.g. INCR on text)
    #[error("Wrong value type for key: {0}")]
    WrongType(String),

    /// Value could not be encoded as JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Errors that mean the session itself is gone or unresponsive, as
    /// opposed to a bad command or value.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            StoreError::Unavailable | StoreError::Timeout(_) | StoreError::ConnectFailed { .. } => {
                true
            }
            StoreError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            StoreError::WrongType(_) | StoreError::Serialization(_) => false,
        }
    }
}

// == App Error Enum ==
/// Errors surfaced to HTTP clients.
#[derive(Error, Debug)]
pub enum AppError {
    /// Key or resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or wrong admin credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Quota for the route class is exhausted
    #[error("Too many requests, retry after {retry_after} seconds")]
    RateLimited {
        limit: u32,
        reset_at: i64,
        retry_after: u64,
    },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::RateLimited {
                limit,
                reset_at,
                retry_after,
            } => {
                let body = Json(json!({
                    "error": "Too many requests, please try again later.",
                    "retryAfter": retry_after,
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                let headers = response.headers_mut();
                headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
                headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
                headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_at));
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
            other => {
                let (status, message) = match &other {
                    AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
                    AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                    AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
                };
                (status, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}

// == Result Type Aliases ==
/// Result of a raw store call.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Convenience Result type for HTTP handlers.
pub type Result<T> = std::result::Result<T, AppError>;
