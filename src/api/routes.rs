//! API Routes
//!
//! Configures the Axum router with the administrative endpoints.

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_cache_handler, health_handler, inspect_key_handler, limit_info_handler,
    list_keys_handler, reset_class_handler, reset_limit_handler, stats_handler,
    warm_cache_handler, AppContext,
};
use crate::middleware::{enforce_rate_limit, rate_limit, require_admin_token};
use crate::ratelimit::RouteClass;

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check including a store probe
/// - `GET /stats` - Cache statistics
/// - `GET /admin/cache/keys?pattern=` - List keys
/// - `GET /admin/cache/key/:key` - Inspect one key
/// - `DELETE /admin/cache?pattern=` - Delete keys by pattern
/// - `POST /admin/cache/warm` - Pre-populate records
/// - `GET|DELETE /admin/ratelimit/:class/:identifier` - Read or reset one counter
/// - `DELETE /admin/ratelimit/:class` - Reset a whole class
///
/// # Middleware
/// - Admin token: `/admin` routes require `X-Admin-Token`, 401 otherwise
/// - Rate limiting: `/admin` routes count against the `admin` class
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(ctx: AppContext) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin_limit = rate_limit(ctx.limiter.clone(), RouteClass::Admin, None);
    let admin = Router::new()
        .route("/admin/cache", delete(clear_cache_handler))
        .route("/admin/cache/keys", get(list_keys_handler))
        .route("/admin/cache/key/:key", get(inspect_key_handler))
        .route("/admin/cache/warm", post(warm_cache_handler))
        .route(
            "/admin/ratelimit/:class/:identifier",
            get(limit_info_handler).delete(reset_limit_handler),
        )
        .route("/admin/ratelimit/:class", delete(reset_class_handler))
        .route_layer(from_fn_with_state(ctx.admin_token.clone(), require_admin_token))
        .route_layer(from_fn_with_state(admin_limit, enforce_rate_limit));

    Router::new()
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .merge(admin)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
