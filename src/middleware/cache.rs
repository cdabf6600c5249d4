//! Read-through response cache
//!
//! `LOOKUP -> HIT: respond from cache | MISS: run handler -> populate -> respond`.
//! Population happens on a spawned task after the response body has been
//! handed back to the server, so a slow or failing store never delays or
//! alters the response.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{request::Parts, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::debug;

use super::{buffer_body, has_error_field, json_payload};
use crate::cache::CacheService;

/// TTL of cached responses when the route does not set one, in seconds.
pub const DEFAULT_RESPONSE_TTL: u64 = 300;

const CACHE_STATUS_HEADER: &str = "x-cache";

/// Derives the cache key of a request. `None` skips caching for it.
pub type KeyFn = Arc<dyn Fn(&Parts) -> Option<String> + Send + Sync>;

/// Per-route cache configuration, used as middleware state.
#[derive(Clone)]
pub struct CacheRoute {
    cache: CacheService,
    key: KeyFn,
    ttl: u64,
}

impl CacheRoute {
    /// Caches every request of the route under one key.
    pub fn fixed(cache: CacheService, key: impl Into<String>) -> Self {
        let key = key.into();
        Self::keyed(cache, move |_: &Parts| Some(key.clone()))
    }

    /// Caches under a key computed from the request.
    pub fn keyed<F>(cache: CacheService, key: F) -> Self
    where
        F: Fn(&Parts) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            cache,
            key: Arc::new(key),
            ttl: DEFAULT_RESPONSE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Marks a cached payload so clients can tell it from a fresh one.
fn mark_cached(mut payload: Value) -> Value {
    if let Value::Object(map) = &mut payload {
        map.insert("_cached".to_string(), Value::Bool(true));
    }
    payload
}

fn with_cache_status(mut response: Response, status: &'static str) -> Response {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status));
    response
}

/// Middleware serving [`CacheRoute`]s.
pub async fn serve_cached(
    State(route): State<CacheRoute>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let Some(key) = (route.key)(&parts) else {
        return next.run(Request::from_parts(parts, body)).await;
    };

    if let Some(cached) = route.cache.get(&key).await {
        debug!(key, "response served from cache");
        return with_cache_status(Json(mark_cached(cached)).into_response(), "HIT");
    }

    let response = next.run(Request::from_parts(parts, body)).await;
    if !response.status().is_success() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match buffer_body(body).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    let payload = json_payload(&parts, &bytes).filter(|v| !has_error_field(v));
    let response = Response::from_parts(parts, Body::from(bytes));
    let Some(payload) = payload else {
        return response;
    };

    let cache = route.cache.clone();
    let ttl = route.ttl;
    tokio::spawn(async move {
        if cache.set(&key, &payload, ttl).await {
            debug!(key, ttl, "response cached");
        }
    });
    with_cache_status(response, "MISS")
}
