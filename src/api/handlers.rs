//! API Handlers
//!
//! Application context plus the HTTP handlers of the administrative
//! surface: health, statistics, cache inspection and rate-limit resets.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::{info, warn};

use crate::auth::{select_blacklist, BlacklistStore, MemoryBlacklist};
use crate::cache::{CacheService, KeyInspection};
use crate::config::{Config, StoreBackend};
use crate::error::{AppError, Result};
use crate::middleware::AdminToken;
use crate::models::{
    ClearQuery, ClearResponse, HealthResponse, KeysQuery, KeysResponse,
    ResetResponse, StatsResponse, WarmRequest, WarmResponse,
};
use crate::ratelimit::{RateLimitDecision, RateLimiter, RouteClass};
use crate::store::{MemoryStore, RetryPolicy, StoreHandle};
use crate::tasks::ExpirySweep;

// == Application Context ==
/// Everything the middleware and handlers share. Built once at startup and
/// passed explicitly; nothing in the crate reaches for a global handle.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<StoreHandle>,
    pub cache: CacheService,
    pub limiter: RateLimiter,
    pub blacklist: Arc<dyn BlacklistStore>,
    pub admin_token: AdminToken,
    sweep_targets: Vec<Arc<dyn ExpirySweep>>,
}

impl AppContext {
    /// Context over an already constructed store handle, with in-process
    /// token revocations.
    pub fn new(store: Arc<StoreHandle>) -> Self {
        let blacklist = Arc::new(MemoryBlacklist::new());
        Self {
            cache: CacheService::new(store.clone()),
            limiter: RateLimiter::new(store.clone()),
            store,
            blacklist: blacklist.clone(),
            admin_token: None,
            sweep_targets: vec![blacklist as Arc<dyn ExpirySweep>],
        }
    }

    /// Opens the admin routes to requests carrying `token`.
    pub fn with_admin_token(mut self, token: impl Into<Arc<str>>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    /// Replaces the rate limiter, e.g. with custom quotas or a manual clock.
    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Builds the store selected in `config` and connects it.
    ///
    /// A failed connection is not fatal: the context is returned with an
    /// unready store and every consumer fails open until
    /// [`StoreHandle::reconnect`] succeeds.
    pub async fn init(config: &Config) -> Self {
        let policy = RetryPolicy::from_config(config);
        let mut sweep_targets: Vec<Arc<dyn ExpirySweep>> = Vec::new();

        let store = match config.store_backend {
            StoreBackend::Redis => StoreHandle::redis(config.redis_url.clone(), policy),
            StoreBackend::Memory => {
                let memory = Arc::new(MemoryStore::new());
                sweep_targets.push(memory.clone());
                StoreHandle::memory(memory, policy)
            }
        };
        let store = Arc::new(store);

        if let Err(e) = store.connect().await {
            warn!(error = %e, "Starting without key-value store, caching and rate limiting disabled");
        }

        let memory_blacklist = Arc::new(MemoryBlacklist::new());
        sweep_targets.push(memory_blacklist.clone());
        let blacklist = select_blacklist(config, &store, memory_blacklist);

        if config.admin_token.is_none() {
            warn!("ADMIN_TOKEN not set, admin routes will reject every request");
        }

        info!(
            backend = ?config.store_backend,
            ready = store.is_ready(),
            blacklist = blacklist.backend(),
            "Application context initialized"
        );

        Self {
            cache: CacheService::new(store.clone()),
            limiter: RateLimiter::new(store.clone()),
            store,
            blacklist,
            admin_token: config.admin_token.as_deref().map(Arc::from),
            sweep_targets,
        }
    }

    /// In-process stores the background sweep must visit.
    pub fn sweep_targets(&self) -> Vec<Arc<dyn ExpirySweep>> {
        self.sweep_targets.clone()
    }

    /// Closes the store session. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.store.disconnect().await;
        info!("Application context shut down");
    }
}

fn parse_class(name: &str) -> Result<RouteClass> {
    name.parse().map_err(AppError::InvalidRequest)
}

/// Handler for GET /health
pub async fn health_handler(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    // The round trip doubles as a probe, so readiness is read after it.
    let cache_ok = ctx.cache.health_check().await;
    let store_ready = ctx.store.is_ready();
    Json(HealthResponse::new(store_ready, cache_ok, ctx.blacklist.backend()))
}

/// Handler for GET /stats
pub async fn stats_handler(State(ctx): State<AppContext>) -> Json<StatsResponse> {
    Json(ctx.cache.stats().into())
}

/// Handler for GET /admin/cache/keys?pattern=
pub async fn list_keys_handler(
    State(ctx): State<AppContext>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<KeysResponse>> {
    if let Some(error_msg) = query.validate() {
        return Err(AppError::InvalidRequest(error_msg));
    }
    let keys = ctx.cache.list_keys(query.pattern()).await?;
    Ok(Json(KeysResponse::new(query.pattern(), keys)))
}

/// Handler for GET /admin/cache/key/:key
pub async fn inspect_key_handler(
    State(ctx): State<AppContext>,
    Path(key): Path<String>,
) -> Result<Json<KeyInspection>> {
    match ctx.cache.inspect_key(&key).await? {
        Some(inspection) => Ok(Json(inspection)),
        None => Err(AppError::NotFound(format!("Key '{}' not found", key))),
    }
}

/// Handler for DELETE /admin/cache?pattern=
pub async fn clear_cache_handler(
    State(ctx): State<AppContext>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<ClearResponse>> {
    if let Some(error_msg) = query.validate() {
        return Err(AppError::InvalidRequest(error_msg));
    }
    let removed = ctx.cache.clear_pattern(&query.pattern).await?;
    info!(pattern = %query.pattern, removed, "cache cleared by operator");
    Ok(Json(ClearResponse {
        pattern: query.pattern,
        removed,
    }))
}

/// Handler for POST /admin/cache/warm
pub async fn warm_cache_handler(
    State(ctx): State<AppContext>,
    Json(req): Json<WarmRequest>,
) -> Result<Json<WarmResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(AppError::InvalidRequest(error_msg));
    }
    let kind = req.kind;
    let items = req.into_pairs();
    let stored = ctx.cache.warm(kind, &items).await;
    Ok(Json(WarmResponse {
        kind,
        requested: items.len(),
        stored,
    }))
}

/// Handler for GET /admin/ratelimit/:class/:identifier
pub async fn limit_info_handler(
    State(ctx): State<AppContext>,
    Path((class, identifier)): Path<(String, String)>,
) -> Result<Json<RateLimitDecision>> {
    let class = parse_class(&class)?;
    Ok(Json(ctx.limiter.get_limit_info(&identifier, class).await))
}

/// Handler for DELETE /admin/ratelimit/:class/:identifier
pub async fn reset_limit_handler(
    State(ctx): State<AppContext>,
    Path((class, identifier)): Path<(String, String)>,
) -> Result<Json<ResetResponse>> {
    let class = parse_class(&class)?;
    let removed = ctx.limiter.reset_limit(&identifier, class).await?;
    Ok(Json(ResetResponse {
        class,
        identifier: Some(identifier),
        removed: u64::from(removed),
    }))
}

/// Handler for DELETE /admin/ratelimit/:class
pub async fn reset_class_handler(
    State(ctx): State<AppContext>,
    Path(class): Path<String>,
) -> Result<Json<ResetResponse>> {
    let class = parse_class(&class)?;
    let removed = ctx.limiter.reset_class(class).await?;
    Ok(Json(ResetResponse {
        class,
        identifier: None,
        removed,
    }))
}
