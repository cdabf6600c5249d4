//! Token revocation store
//!
//! Credentials revoked at logout stay blacklisted until they would have
//! expired anyway. Two interchangeable variants share one trait: one keeps
//! entries in the shared store, the other in process memory (lost on
//! restart, which is acceptable for this data).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{BlacklistBackend, Config};
use crate::store::{current_timestamp_ms, StoreHandle};

/// `blacklist_<token>`
pub fn revocation_key(token: &str) -> String {
    format!("blacklist_{}", token)
}

// == Blacklist Store Trait ==
#[async_trait]
pub trait BlacklistStore: Send + Sync {
    /// Blacklists `token` for `ttl_secs` seconds. Returns false if the
    /// revocation could not be recorded.
    async fn revoke(&self, token: &str, ttl_secs: u64) -> bool;

    async fn is_revoked(&self, token: &str) -> bool;

    /// Short name of the variant, for logs and health output.
    fn backend(&self) -> &'static str;
}

// == Shared-Store Variant ==
pub struct StoreBlacklist {
    store: Arc<StoreHandle>,
}

impl StoreBlacklist {
    pub fn new(store: Arc<StoreHandle>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BlacklistStore for StoreBlacklist {
    async fn revoke(&self, token: &str, ttl_secs: u64) -> bool {
        match self.store.set_ex(&revocation_key(token), "1", ttl_secs).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to record token revocation");
                false
            }
        }
    }

    async fn is_revoked(&self, token: &str) -> bool {
        match self.store.exists(&revocation_key(token)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "revocation lookup failed, treating token as valid");
                false
            }
        }
    }

    fn backend(&self) -> &'static str {
        "store"
    }
}

// == In-Process Variant ==
#[derive(Debug, Clone, Copy)]
struct RevocationEntry {
    inserted_at: u64,
    ttl_ms: u64,
}

impl RevocationEntry {
    fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.inserted_at + self.ttl_ms
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlacklist {
    entries: RwLock<HashMap<String, RevocationEntry>>,
}

impl MemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes expired revocations. Returns the number removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl BlacklistStore for MemoryBlacklist {
    async fn revoke(&self, token: &str, ttl_secs: u64) -> bool {
        let entry = RevocationEntry {
            inserted_at: current_timestamp_ms(),
            ttl_ms: ttl_secs * 1000,
        };
        self.entries
            .write()
            .await
            .insert(revocation_key(token), entry);
        true
    }

    async fn is_revoked(&self, token: &str) -> bool {
        let now = current_timestamp_ms();
        self.entries
            .read()
            .await
            .get(&revocation_key(token))
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// == Selection ==
/// Picks the shared-store variant when configured and the store is ready,
/// otherwise the in-process one.
pub fn select_blacklist(
    config: &Config,
    store: &Arc<StoreHandle>,
    memory: Arc<MemoryBlacklist>,
) -> Arc<dyn BlacklistStore> {
    match config.blacklist_backend {
        BlacklistBackend::Store if store.is_ready() => {
            info!("Token revocations stored in the shared key-value store");
            Arc::new(StoreBlacklist::new(store.clone())) as Arc<dyn BlacklistStore>
        }
        BlacklistBackend::Store => {
            warn!("Key-value store not ready, token revocations kept in memory");
            memory as Arc<dyn BlacklistStore>
        }
        BlacklistBackend::Memory => {
            debug!("Token revocations kept in memory");
            memory as Arc<dyn BlacklistStore>
        }
    }
}
