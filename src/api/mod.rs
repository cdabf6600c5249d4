//! API Module
//!
//! Application context, HTTP handlers and routing for the administrative
//! REST API.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Cache statistics
//! - `/admin/cache/...` - Key listing, inspection, clearing and warming
//! - `/admin/ratelimit/...` - Quota inspection and resets

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
