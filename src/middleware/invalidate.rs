//! Cache invalidation after mutations
//!
//! Runs the handler first; only a successful response triggers deletion.
//! A 2xx response whose JSON body carries an `error` member is not a success.
//! Deletions complete before the response is returned, so a client that
//! reads right after its own write never sees the stale entry.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use tracing::debug;

use super::{buffer_body, has_error_field, json_payload};
use crate::cache::{entity_key, list_pattern, CacheService, EntityKind};

/// Computes keys or patterns from the request and the JSON response body.
pub type TargetFn = Arc<dyn Fn(&Parts, Option<&Value>) -> Vec<String> + Send + Sync>;

/// One thing to purge after a successful mutation.
#[derive(Clone)]
pub enum Invalidate {
    Key(String),
    Pattern(String),
    /// Computed targets; entries containing `*` or `?` are deleted as patterns.
    Computed(TargetFn),
}

impl Invalidate {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&Parts, Option<&Value>) -> Vec<String> + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(f))
    }

    /// The record of `kind` whose id `id` extracts, plus every list of that
    /// kind. Nothing is purged when no id can be extracted.
    pub fn entity<F>(kind: EntityKind, id: F) -> Self
    where
        F: Fn(&Parts, Option<&Value>) -> Option<String> + Send + Sync + 'static,
    {
        Self::computed(move |parts, body| match id(parts, body) {
            Some(id) => vec![entity_key(kind, &id), list_pattern(kind)],
            None => vec![list_pattern(kind)],
        })
    }
}

fn is_pattern(target: &str) -> bool {
    target.contains(['*', '?'])
}

/// Per-route invalidation targets, used as middleware state.
#[derive(Clone)]
pub struct InvalidationRoute {
    cache: CacheService,
    targets: Arc<[Invalidate]>,
}

impl InvalidationRoute {
    pub fn new(cache: CacheService, targets: impl IntoIterator<Item = Invalidate>) -> Self {
        Self {
            cache,
            targets: targets.into_iter().collect(),
        }
    }

    async fn purge(&self, parts: &Parts, body: Option<&Value>) {
        for target in self.targets.iter() {
            match target {
                Invalidate::Key(key) => {
                    self.cache.delete(key).await;
                }
                Invalidate::Pattern(pattern) => {
                    self.cache.delete_pattern(pattern).await;
                }
                Invalidate::Computed(compute) => {
                    for computed in compute(parts, body) {
                        if is_pattern(&computed) {
                            self.cache.delete_pattern(&computed).await;
                        } else {
                            self.cache.delete(&computed).await;
                        }
                    }
                }
            }
        }
    }
}

/// Middleware serving [`InvalidationRoute`]s.
pub async fn invalidate_after(
    State(route): State<InvalidationRoute>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let snapshot = parts.clone();

    let response = next.run(Request::from_parts(parts, body)).await;
    if !response.status().is_success() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match buffer_body(body).await {
        Ok(bytes) => bytes,
        Err(response) => {
            // The mutation went through; only its body was lost.
            route.purge(&snapshot, None).await;
            return response;
        }
    };
    let payload = json_payload(&parts, &bytes);
    if payload.as_ref().is_some_and(has_error_field) {
        debug!(uri = %snapshot.uri, "mutation reported an error, cache kept");
    } else {
        route.purge(&snapshot, payload.as_ref()).await;
    }
    Response::from_parts(parts, Body::from(bytes))
}
