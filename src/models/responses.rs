//! Response DTOs for the administrative API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheStats, EntityKind};
use crate::ratelimit::RouteClass;

/// Response body for `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    /// Whether the store session is established
    pub store_ready: bool,
    /// Whether a probe value could be written and read back
    pub cache_ok: bool,
    /// Token revocation variant in use
    pub blacklist: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// The service keeps answering without the store, so a failed probe
    /// reports `degraded` rather than an error status.
    pub fn new(store_ready: bool, cache_ok: bool, blacklist: impl Into<String>) -> Self {
        let status = if store_ready && cache_ok {
            "healthy"
        } else {
            "degraded"
        };
        Self {
            status: status.to_string(),
            store_ready,
            cache_ok,
            blacklist: blacklist.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for `GET /stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            stats,
        }
    }
}

/// Response body for `GET /admin/cache/keys`
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub pattern: String,
    pub count: usize,
    pub keys: Vec<String>,
}

impl KeysResponse {
    pub fn new(pattern: impl Into<String>, mut keys: Vec<String>) -> Self {
        keys.sort();
        Self {
            pattern: pattern.into(),
            count: keys.len(),
            keys,
        }
    }
}

/// Response body for `DELETE /admin/cache`
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub pattern: String,
    pub removed: u64,
}

/// Response body for `POST /admin/cache/warm`
#[derive(Debug, Clone, Serialize)]
pub struct WarmResponse {
    pub kind: EntityKind,
    pub requested: usize,
    pub stored: usize,
}

/// Response body for the rate-limit reset endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ResetResponse {
    pub class: RouteClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub removed: u64,
}
