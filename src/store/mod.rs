//! Store Module
//!
//! The key-value store contract the cache and rate limiter are written
//! against, its two backends (Redis and an in-process TTL map), and the
//! `StoreHandle` adapter that owns the session lifecycle.

mod entry;
mod glob;
mod handle;
mod memory;
mod redis_store;

use async_trait::async_trait;

use crate::error::StoreResult;

// Re-export public types
pub use entry::{current_timestamp_ms, StoreEntry};
pub use glob::glob_match;
pub use handle::{backoff_delay, connector_fn, Connector, RetryPolicy, StoreHandle};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

// == Public Constants ==
/// `TTL` reply for a key that does not exist
pub const TTL_MISSING: i64 = -2;

/// `TTL` reply for a key without an expiry
pub const TTL_PERSISTENT: i64 = -1;

// == Key-Value Store Trait ==
/// Commands consumed from the shared store.
///
/// Every method maps to a single store command, so each call is atomic on
/// the server side and no client-side locking is needed.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `GET key`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// `SET key value EX ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;

    /// `INCR key`, creating the key at 1 when absent
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// `EXPIRE key ttl`; false if the key does not exist
    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool>;

    /// `DEL key...`; returns the number of keys removed
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    /// `KEYS pattern`
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// `TTL key`; [`TTL_MISSING`] or [`TTL_PERSISTENT`] for the special cases
    async fn ttl(&self, key: &str) -> StoreResult<i64>;

    /// `EXISTS key`
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// `TYPE key`; `"none"` when absent
    async fn key_type(&self, key: &str) -> StoreResult<String>;

    /// `PING`
    async fn ping(&self) -> StoreResult<()>;
}
