//! Rate-limit middleware
//!
//! Counts each request against its route class, rejects with 429 once the
//! window's quota is spent and reports quota state on every response.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::ratelimit::{resolve_identifier, IdentifierFn, RateLimiter, RouteClass};

/// Route class and identifier strategy, used as middleware state.
#[derive(Clone)]
pub struct RateLimitRoute {
    limiter: RateLimiter,
    class: RouteClass,
    identify: IdentifierFn,
}

/// Middleware state for `class`. Without `identify`, requests are counted
/// per principal when authenticated and per network origin otherwise.
pub fn rate_limit(
    limiter: RateLimiter,
    class: RouteClass,
    identify: Option<IdentifierFn>,
) -> RateLimitRoute {
    RateLimitRoute {
        limiter,
        class,
        identify: identify.unwrap_or_else(|| Arc::new(resolve_identifier) as IdentifierFn),
    }
}

/// Middleware serving [`RateLimitRoute`]s.
pub async fn enforce_rate_limit(
    State(route): State<RateLimitRoute>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let identifier = (route.identify)(&parts);
    let decision = route.limiter.check_limit(&identifier, route.class).await;

    if !decision.allowed {
        return AppError::RateLimited {
            limit: decision.limit,
            reset_at: decision.reset_secs(),
            retry_after: decision.retry_after.unwrap_or(1),
        }
        .into_response();
    }

    let mut response = next.run(Request::from_parts(parts, body)).await;
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset_secs()));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{by_network_origin, Principal, QuotaTable, RatePolicy};
    use crate::store::{MemoryStore, RetryPolicy, StoreHandle};
    use axum::{
        body::Body, http::StatusCode, middleware::from_fn_with_state, routing::post, Router,
    };
    use serde_json::Value;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tower::ServiceExt;

    // 20 s into a one-minute window
    const T0: i64 = 1_699_999_980_000 + 20_000;

    fn limiter(now: Arc<AtomicI64>) -> (RateLimiter, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let handle = StoreHandle::with_backend(memory.clone(), RetryPolicy::default());
        let quotas = QuotaTable::new([
            (RouteClass::NotesUpload, RatePolicy::new(60, 3)),
            (RouteClass::Auth, RatePolicy::new(900, 2)),
        ]);
        let limiter = RateLimiter::with_quotas(Arc::new(handle), quotas)
            .with_clock(Arc::new(move || now.load(Ordering::SeqCst)));
        (limiter, memory)
    }

    fn app(route: RateLimitRoute) -> Router {
        Router::new()
            .route("/upload", post(|| async { "stored" }))
            .layer(from_fn_with_state(route, enforce_rate_limit))
    }

    fn upload(ip: &str, user: Option<&str>) -> Request {
        let mut request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap();
        if let Some(user) = user {
            request.extensions_mut().insert(Principal(user.to_string()));
        }
        request
    }

    #[tokio::test]
    async fn test_headers_and_denial() {
        let now = Arc::new(AtomicI64::new(T0));
        let (limiter, _) = limiter(now.clone());
        let app = app(rate_limit(limiter, RouteClass::NotesUpload, None));

        for expected_remaining in ["2", "1", "0"] {
            let response = app.clone().oneshot(upload("10.0.0.1", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["X-RateLimit-Limit"], "3");
            assert_eq!(response.headers()["X-RateLimit-Remaining"], expected_remaining);
            assert_eq!(response.headers()["X-RateLimit-Reset"], "1700000040");
        }

        let denied = app.clone().oneshot(upload("10.0.0.1", None)).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(denied.headers()["Retry-After"], "40");
        assert_eq!(denied.headers()["X-RateLimit-Remaining"], "0");
        let bytes = axum::body::to_bytes(denied.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["retryAfter"], 40);

        // Another origin has its own quota.
        let other = app.clone().oneshot(upload("10.0.0.2", None)).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);

        now.store(T0 + 40_000, Ordering::SeqCst);
        let next_window = app.oneshot(upload("10.0.0.1", None)).await.unwrap();
        assert_eq!(next_window.status(), StatusCode::OK);
        assert_eq!(next_window.headers()["X-RateLimit-Remaining"], "2");
    }

    #[tokio::test]
    async fn test_principal_vs_origin_identifiers() {
        let now = Arc::new(AtomicI64::new(T0));
        let (limiter, _) = limiter(now);
        let per_user = app(rate_limit(limiter.clone(), RouteClass::Auth, None));
        let per_origin = app(rate_limit(limiter, RouteClass::Auth, Some(by_network_origin())));

        // Same user from two addresses shares one quota.
        for ip in ["10.0.0.1", "10.0.0.2"] {
            let response = per_user.clone().oneshot(upload(ip, Some("7"))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = per_user.oneshot(upload("10.0.0.3", Some("7"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // Origin-keyed counting ignores the claimed identity.
        for user in ["a", "b"] {
            let response = per_origin
                .clone()
                .oneshot(upload("10.9.9.9", Some(user)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = per_origin.oneshot(upload("10.9.9.9", Some("c"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let now = Arc::new(AtomicI64::new(T0));
        let (limiter, memory) = limiter(now);
        memory.set_offline(true);
        let app = app(rate_limit(limiter, RouteClass::NotesUpload, None));

        for _ in 0..5 {
            let response = app.clone().oneshot(upload("10.0.0.1", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["X-RateLimit-Remaining"], "999");
        }
    }
}
