//! In-process store
//!
//! TTL map implementing [`KeyValueStore`] for single-instance deployments,
//! local development and tests. It can be switched offline or slowed down to
//! exercise the fail-open paths of its callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    current_timestamp_ms, glob_match, KeyValueStore, StoreEntry, TTL_MISSING, TTL_PERSISTENT,
};
use crate::error::{StoreError, StoreResult};

// == Memory Store ==
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoreEntry>>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent command fail with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delays every subsequent command by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of live (non-expired) entries.
    pub async fn len(&self) -> usize {
        let now = current_timestamp_ms();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // == Cleanup Expired ==
    /// Removes all expired entries. Returns the number removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    async fn precheck(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    /// Live entry for `key`, dropping it first if it has expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, StoreEntry>,
        key: &str,
    ) -> Option<&'a mut StoreEntry> {
        if entries.get(key).is_some_and(|e| e.is_expired()) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.precheck().await?;
        let mut entries = self.entries.write().await;
        Ok(Self::live(&mut entries, key).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.precheck().await?;
        let entry = StoreEntry::new(value.to_string(), Some(ttl_secs));
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.precheck().await?;
        let mut entries = self.entries.write().await;
        match Self::live(&mut entries, key) {
            Some(entry) => {
                let current: i64 = entry
                    .value
                    .parse()
                    .map_err(|_| StoreError::WrongType(key.to_string()))?;
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| StoreError::WrongType(key.to_string()))?;
                // INCR keeps the existing deadline
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(key.to_string(), StoreEntry::new("1".to_string(), None));
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool> {
        self.precheck().await?;
        let mut entries = self.entries.write().await;
        match Self::live(&mut entries, key) {
            Some(entry) => {
                entry.expire_in(ttl_secs);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.precheck().await?;
        let now = current_timestamp_ms();
        let mut entries = self.entries.write().await;
        let removed = keys
            .iter()
            .filter_map(|k| entries.remove(k))
            .filter(|e| !e.is_expired_at(now))
            .count();
        Ok(removed as u64)
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.precheck().await?;
        let now = current_timestamp_ms();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| !e.is_expired_at(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        self.precheck().await?;
        let mut entries = self.entries.write().await;
        Ok(match Self::live(&mut entries, key) {
            Some(entry) => entry
                .ttl_remaining()
                .map(|s| s as i64)
                .unwrap_or(TTL_PERSISTENT),
            None => TTL_MISSING,
        })
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.precheck().await?;
        let mut entries = self.entries.write().await;
        Ok(Self::live(&mut entries, key).is_some())
    }

    async fn key_type(&self, key: &str) -> StoreResult<String> {
        Ok(if self.exists(key).await? {
            "string".to_string()
        } else {
            "none".to_string()
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        self.precheck().await
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store.set_ex("key1", "value1", 60).await.unwrap();

        assert_eq!(store.get("key1").await.unwrap(), Some("value1".to_string()));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = MemoryStore::new();
        store.set_ex("key1", "value1", 60).await.unwrap();
        store.set_ex("key1", "value2", 60).await.unwrap();

        assert_eq!(store.get("key1").await.unwrap(), Some("value2".to_string()));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let store = MemoryStore::new();
        store.set_ex("key1", "value1", 1).await.unwrap();
        assert!(store.exists("key1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(store.get("key1").await.unwrap(), None);
        assert_eq!(store.ttl("key1").await.unwrap(), TTL_MISSING);
    }

    #[tokio::test]
    async fn test_incr_creates_and_counts() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert_eq!(store.ttl("c").await.unwrap(), TTL_PERSISTENT);

        assert!(store.expire("c", 30).await.unwrap());
        assert_eq!(store.incr("c").await.unwrap(), 3);
        assert_eq!(store.ttl("c").await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_incr_on_text_is_wrong_type() {
        let store = MemoryStore::new();
        store.set_ex("k", "hello", 60).await.unwrap();
        assert!(matches!(
            store.incr("k").await,
            Err(StoreError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_incr_overflow_is_an_error() {
        let store = MemoryStore::new();
        store.set_ex("ctr", &i64::MAX.to_string(), 60).await.unwrap();

        let result = store.incr("ctr").await;
        assert!(matches!(result, Err(StoreError::WrongType(_))));
        assert_eq!(store.get("ctr").await.unwrap(), Some(i64::MAX.to_string()));
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let store = MemoryStore::new();
        assert!(!store.expire("missing", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_and_del() {
        let store = MemoryStore::new();
        store.set_ex("notes:1", "a", 60).await.unwrap();
        store.set_ex("notes:list:all", "b", 60).await.unwrap();
        store.set_ex("notes:list:java", "c", 60).await.unwrap();

        let keys = store.keys("notes:list:*").await.unwrap();
        assert_eq!(keys, vec!["notes:list:all", "notes:list:java"]);

        assert_eq!(store.del(&keys).await.unwrap(), 2);
        assert_eq!(store.del(&keys).await.unwrap(), 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_key_type() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 60).await.unwrap();
        assert_eq!(store.key_type("k").await.unwrap(), "string");
        assert_eq!(store.key_type("missing").await.unwrap(), "none");
    }

    #[tokio::test]
    async fn test_offline_fails_every_command() {
        let store = MemoryStore::new();
        store.set_offline(true);

        assert!(matches!(store.ping().await, Err(StoreError::Unavailable)));
        assert!(store.get("k").await.is_err());
        assert!(store.set_ex("k", "v", 1).await.is_err());

        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = MemoryStore::new();
        store.set_ex("short", "v", 1).await.unwrap();
        store.set_ex("long", "v", 60).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(store.cleanup_expired().await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.exists("long").await.unwrap());
    }
}
