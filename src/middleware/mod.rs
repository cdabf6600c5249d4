//! HTTP Middleware
//!
//! Route-level layers composed around application handlers:
//! - rate limiting with `X-RateLimit-*` headers and 429 denials
//! - read-through response caching
//! - cache invalidation after successful mutations
//! - the admin token check
//!
//! Each layer is a plain `async fn` mounted with
//! [`axum::middleware::from_fn_with_state`]; its state value carries the
//! per-route configuration.

mod admin_auth;
mod cache;
mod invalidate;
mod rate_limit;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::response::Parts;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::warn;

use crate::error::AppError;

pub use admin_auth::{require_admin_token, AdminToken, ADMIN_TOKEN_HEADER};
pub use cache::{serve_cached, CacheRoute, KeyFn, DEFAULT_RESPONSE_TTL};
pub use invalidate::{invalidate_after, Invalidate, InvalidationRoute, TargetFn};
pub use rate_limit::{enforce_rate_limit, rate_limit, RateLimitRoute};

/// True when a handler body reports an error: an `error` member that is
/// present and neither `null` nor `false`.
pub fn has_error_field(body: &Value) -> bool {
    match body.get("error") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(_) => true,
    }
}

/// Buffers a response body so it can be inspected and then re-sent.
/// A failed body stream leaves nothing to forward, so the client gets a 500
/// instead of the original headers over an empty body.
pub(crate) async fn buffer_body(body: Body) -> Result<Bytes, Response> {
    to_bytes(body, usize::MAX).await.map_err(|e| {
        warn!(error = %e, "failed to buffer response body");
        AppError::Internal("response body could not be read".to_string()).into_response()
    })
}

/// JSON payload of a buffered response, if it declares or parses as JSON.
pub(crate) fn json_payload(parts: &Parts, bytes: &Bytes) -> Option<Value> {
    let declared_other = parts
        .headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| !ct.starts_with("application/json"));
    if declared_other {
        return None;
    }
    serde_json::from_slice(bytes).ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Body that yields a partial chunk and then fails.
    pub(crate) fn broken_body() -> Body {
        Body::from_stream(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"id\":")),
            Err(std::io::Error::other("connection reset")),
        ]))
    }

    #[tokio::test]
    async fn test_broken_body_becomes_internal_error() {
        let response = buffer_body(broken_body()).await.unwrap_err();
        assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_field_detection() {
        assert!(has_error_field(&json!({ "error": "boom" })));
        assert!(has_error_field(&json!({ "error": { "code": 7 } })));
        assert!(!has_error_field(&json!({ "error": null })));
        assert!(!has_error_field(&json!({ "error": false })));
        assert!(!has_error_field(&json!({ "data": [1, 2] })));
        assert!(!has_error_field(&json!([1, 2, 3])));
    }
}
