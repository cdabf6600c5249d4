//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::str::FromStr;

/// Which key-value backend the store adapter connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Shared Redis server at `redis_url`
    Redis,
    /// In-process TTL map (single instance only)
    Memory,
}

/// Which variant of the token revocation store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistBackend {
    /// Revocations live in the shared key-value store
    Store,
    /// Revocations live in process memory and are lost on restart
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

impl FromStr for BlacklistBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "store" | "redis" => Ok(BlacklistBackend::Store),
            "memory" => Ok(BlacklistBackend::Memory),
            other => Err(format!("unknown blacklist backend '{}'", other)),
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection string of the shared key-value store
    pub redis_url: String,
    /// Key-value backend
    pub store_backend: StoreBackend,
    /// Upper bound on every store call, in milliseconds
    pub store_timeout_ms: u64,
    /// Connection attempts before the adapter gives up
    pub store_max_retries: u32,
    /// Token revocation store variant
    pub blacklist_backend: BlacklistBackend,
    /// HTTP server port
    pub server_port: u16,
    /// Background sweep interval in seconds
    pub cleanup_interval: u64,
    /// Token required in `X-Admin-Token` on `/admin` routes; unset closes them
    pub admin_token: Option<String>,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `REDIS_URL` - Store connection string (default: redis://127.0.0.1:6379)
    /// - `STORE_BACKEND` - `redis` or `memory` (default: redis)
    /// - `STORE_TIMEOUT_MS` - Per-call timeout (default: 250)
    /// - `STORE_MAX_RETRIES` - Connection attempts (default: 10)
    /// - `BLACKLIST_BACKEND` - `store` or `memory` (default: store)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 60)
    /// - `ADMIN_TOKEN` - Admin API token (default: unset, admin routes closed)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            store_backend: env_or("STORE_BACKEND", defaults.store_backend),
            store_timeout_ms: env_or("STORE_TIMEOUT_MS", defaults.store_timeout_ms),
            store_max_retries: env_or("STORE_MAX_RETRIES", defaults.store_max_retries),
            blacklist_backend: env_or("BLACKLIST_BACKEND", defaults.blacklist_backend),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            store_backend: StoreBackend::Redis,
            store_timeout_ms: 250,
            store_max_retries: 10,
            blacklist_backend: BlacklistBackend::Store,
            server_port: 3000,
            cleanup_interval: 60,
            admin_token: None,
        }
    }
}
