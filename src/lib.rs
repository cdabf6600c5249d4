//! notecache - Caching and rate limiting over a shared key-value store
//!
//! Cache-aside storage for entity records and list views, hierarchical
//! invalidation, fixed-window rate limiting per route class, token
//! revocation, and the axum middleware that composes them around handlers.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod ratelimit;
pub mod store;
pub mod tasks;

pub use api::{create_router, AppContext};
pub use config::Config;
pub use tasks::spawn_cleanup_task;
