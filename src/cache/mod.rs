//! Cache Module
//!
//! Cache-aside service over the shared store, with namespaced keys,
//! per-namespace TTLs, and prefix-based invalidation.

pub mod keys;
mod service;
mod stats;

// Re-export public types
pub use keys::{entity_key, list_key, list_pattern, EntityKind};
pub use service::{CacheService, KeyInspection};
pub use stats::{CacheStats, StatsRecorder};
