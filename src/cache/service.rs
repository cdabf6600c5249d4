//! Cache Service
//!
//! Cache-aside operations over the shared store. Nothing here ever fails the
//! caller: store faults are logged, counted, and reported as a miss or as
//! `false`. The administrative helpers at the bottom are the exception and
//! return the store error so operator tooling can see it.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::keys::{self, EntityKind, LIST_TTL};
use super::stats::{CacheStats, StatsRecorder};
use crate::error::{StoreError, StoreResult};
use crate::store::{current_timestamp_ms, StoreHandle};

/// Type, TTL and value of a single key, for operator inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyInspection {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub ttl: i64,
    pub value: Option<Value>,
}

// == Cache Service ==
#[derive(Clone)]
pub struct CacheService {
    store: Arc<StoreHandle>,
    stats: Arc<StatsRecorder>,
}

fn log_failure(op: &str, key: &str, err: &StoreError) {
    match err {
        // Expected while the store is down; every request would log it.
        StoreError::Unavailable => debug!(op, key, "cache bypassed, store unavailable"),
        other => warn!(op, key, error = %other, "cache operation failed"),
    }
}

/// Parses a stored value, falling back to the raw text when it is not JSON.
fn decode(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

impl CacheService {
    pub fn new(store: Arc<StoreHandle>) -> Self {
        Self {
            store,
            stats: Arc::new(StatsRecorder::new()),
        }
    }

    pub fn store(&self) -> &Arc<StoreHandle> {
        &self.store
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn record_failure(&self, op: &str, key: &str, err: &StoreError) {
        self.stats.record_error();
        log_failure(op, key, err);
    }

    // == Generic Operations ==
    /// Serializes `value` as JSON and stores it under `key` for `ttl` seconds.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: u64) -> bool {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.record_failure("set", key, &StoreError::Serialization(e));
                return false;
            }
        };
        self.set_raw(key, &encoded, ttl).await
    }

    /// Stores pre-encoded text as-is.
    pub async fn set_raw(&self, key: &str, value: &str, ttl: u64) -> bool {
        match self.store.set_ex(key, value, ttl).await {
            Ok(()) => {
                self.stats.record_set();
                debug!(key, ttl, "cache set");
                true
            }
            Err(e) => {
                self.record_failure("set", key, &e);
                false
            }
        }
    }

    /// Returns the stored value, or `None` when absent or unreadable.
    ///
    /// Text that is not valid JSON comes back as `Value::String`.
    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.store.get(key).await {
            Ok(Some(raw)) => {
                self.stats.record_hit();
                debug!(key, "cache hit");
                Some(decode(raw))
            }
            Ok(None) => {
                self.stats.record_miss();
                debug!(key, "cache miss");
                None
            }
            Err(e) => {
                self.stats.record_miss();
                self.record_failure("get", key, &e);
                None
            }
        }
    }

    /// Typed lookup; a value of the wrong shape counts as a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                debug!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self.store.del(&[key.to_string()]).await {
            Ok(_) => {
                self.stats.record_delete();
                debug!(key, "cache delete");
                true
            }
            Err(e) => {
                self.record_failure("delete", key, &e);
                false
            }
        }
    }

    /// Deletes every key matching the glob `pattern`. No match is success.
    pub async fn delete_pattern(&self, pattern: &str) -> bool {
        match self.clear_pattern(pattern).await {
            Ok(_) => true,
            Err(e) => {
                self.record_failure("delete_pattern", pattern, &e);
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.store.exists(key).await {
            Ok(found) => found,
            Err(e) => {
                self.record_failure("exists", key, &e);
                false
            }
        }
    }

    /// Remaining TTL in seconds; `None` if the key is absent or the store failed.
    pub async fn ttl(&self, key: &str) -> Option<i64> {
        match self.store.ttl(key).await {
            Ok(ttl) if ttl >= 0 || ttl == crate::store::TTL_PERSISTENT => Some(ttl),
            Ok(_) => None,
            Err(e) => {
                self.record_failure("ttl", key, &e);
                None
            }
        }
    }

    /// Cache-aside: returns the cached `T` or runs `compute`, stores the
    /// result for `ttl` seconds, and returns it. Errors from `compute` are
    /// passed through and nothing is cached.
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, ttl: u64, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get_as::<T>(key).await {
            return Ok(cached);
        }
        let fresh = compute().await?;
        self.set(key, &fresh, ttl).await;
        Ok(fresh)
    }

    // == Domain Helpers ==
    pub async fn cache_note<T: Serialize + ?Sized>(&self, id: &str, note: &T) -> bool {
        self.cache_entity(EntityKind::Note, id, note).await
    }

    pub async fn get_cached_note(&self, id: &str) -> Option<Value> {
        self.get(&keys::entity_key(EntityKind::Note, id)).await
    }

    pub async fn cache_notes_list<T: Serialize + ?Sized>(
        &self,
        filter: Option<&str>,
        notes: &T,
    ) -> bool {
        let key = keys::list_key(EntityKind::Note, filter);
        self.set(&key, notes, LIST_TTL).await
    }

    pub async fn get_cached_notes_list(&self, filter: Option<&str>) -> Option<Value> {
        self.get(&keys::list_key(EntityKind::Note, filter)).await
    }

    pub async fn cache_user<T: Serialize + ?Sized>(&self, id: &str, user: &T) -> bool {
        self.cache_entity(EntityKind::User, id, user).await
    }

    pub async fn get_cached_user(&self, id: &str) -> Option<Value> {
        self.get(&keys::entity_key(EntityKind::User, id)).await
    }

    pub async fn cache_auth_token(&self, user_id: &str, token: &str) -> bool {
        self.cache_entity(EntityKind::AuthToken, user_id, token).await
    }

    pub async fn get_cached_auth_token(&self, user_id: &str) -> Option<String> {
        self.get_as(&keys::entity_key(EntityKind::AuthToken, user_id))
            .await
    }

    pub async fn cache_chat_messages<T: Serialize + ?Sized>(&self, room: &str, messages: &T) -> bool {
        self.cache_entity(EntityKind::Chat, room, messages).await
    }

    pub async fn get_cached_chat_messages(&self, room: &str) -> Option<Value> {
        self.get(&keys::entity_key(EntityKind::Chat, room)).await
    }

    /// OCR results are keyed by the hash of the recognised input.
    pub async fn cache_ocr_result<T: Serialize + ?Sized>(&self, hash: &str, result: &T) -> bool {
        self.cache_entity(EntityKind::Ocr, hash, result).await
    }

    pub async fn get_cached_ocr_result(&self, hash: &str) -> Option<Value> {
        self.get(&keys::entity_key(EntityKind::Ocr, hash)).await
    }

    pub async fn cache_stats<T: Serialize + ?Sized>(&self, scope: &str, stats: &T) -> bool {
        self.cache_entity(EntityKind::Stats, scope, stats).await
    }

    pub async fn get_cached_stats(&self, scope: &str) -> Option<Value> {
        self.get(&keys::entity_key(EntityKind::Stats, scope)).await
    }

    async fn cache_entity<T: Serialize + ?Sized>(&self, kind: EntityKind, id: &str, value: &T) -> bool {
        let key = keys::entity_key(kind, id);
        self.set(&key, value, kind.default_ttl()).await
    }

    // == Invalidation ==
    /// Drops the record and every list view of its kind. Any mutation can
    /// change list membership or order, so all filters go at once.
    pub async fn invalidate_entity(&self, kind: EntityKind, id: &str) -> bool {
        let entity = self.delete(&keys::entity_key(kind, id)).await;
        let lists = self.delete_pattern(&keys::list_pattern(kind)).await;
        entity && lists
    }

    pub async fn invalidate_note(&self, id: &str) -> bool {
        self.invalidate_entity(EntityKind::Note, id).await
    }

    pub async fn invalidate_user(&self, id: &str) -> bool {
        self.invalidate_entity(EntityKind::User, id).await
    }

    pub async fn invalidate_auth_token(&self, user_id: &str) -> bool {
        self.delete(&keys::entity_key(EntityKind::AuthToken, user_id))
            .await
    }

    pub async fn invalidate_chat(&self, room: &str) -> bool {
        self.delete(&keys::entity_key(EntityKind::Chat, room)).await
    }

    pub async fn invalidate_stats(&self) -> bool {
        self.delete_pattern(&keys::namespace_pattern(EntityKind::Stats))
            .await
    }

    // == Health Check ==
    /// Writes, reads back and deletes a probe value. Healthy only if the
    /// read-back value equals what was written.
    pub async fn health_check(&self) -> bool {
        let now = current_timestamp_ms();
        let key = format!("health:check:{}", now);
        let probe = serde_json::json!({ "status": "ok", "timestamp": now });

        if !self.set(&key, &probe, 10).await {
            return false;
        }
        let read_back = self.get(&key).await;
        self.delete(&key).await;
        read_back.as_ref() == Some(&probe)
    }

    // == Administration ==
    pub async fn list_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.store.keys(pattern).await
    }

    /// `None` when the key does not exist.
    pub async fn inspect_key(&self, key: &str) -> StoreResult<Option<KeyInspection>> {
        let kind = self.store.key_type(key).await?;
        if kind == "none" {
            return Ok(None);
        }
        let ttl = self.store.ttl(key).await?;
        // Only string keys can be read with GET.
        let value = if kind == "string" {
            self.store.get(key).await?.map(decode)
        } else {
            None
        };
        Ok(Some(KeyInspection {
            key: key.to_string(),
            kind,
            ttl,
            value,
        }))
    }

    /// Enumerates matches with `KEYS`, then removes them in one `DEL`.
    pub async fn clear_pattern(&self, pattern: &str) -> StoreResult<u64> {
        let keys = self.store.keys(pattern).await?;
        if keys.is_empty() {
            debug!(pattern, "no keys matched");
            return Ok(0);
        }
        let removed = self.store.del(&keys).await?;
        self.stats.record_delete();
        debug!(pattern, removed, "cache pattern delete");
        Ok(removed)
    }

    /// Pre-populates records of `kind`. Returns how many were stored.
    pub async fn warm(&self, kind: EntityKind, items: &[(String, Value)]) -> usize {
        let mut stored = 0;
        for (id, value) in items {
            if self.cache_entity(kind, id, value).await {
                stored += 1;
            }
        }
        info!(kind = %kind, requested = items.len(), stored, "cache warmed");
        stored
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore, RetryPolicy};
    use serde::Deserialize;
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn service() -> (CacheService, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let handle = StoreHandle::with_backend(memory.clone(), RetryPolicy::default());
        (CacheService::new(Arc::new(handle)), memory)
    }

    #[tokio::test]
    async fn test_set_and_get_round_trip() {
        let (cache, _) = service();
        let note = json!({ "id": "1", "title": "Graphs", "tags": ["cs", "math"] });

        assert!(cache.set("notes:1", &note, 60).await);
        assert_eq!(cache.get("notes:1").await, Some(note));
    }

    #[tokio::test]
    async fn test_get_returns_raw_text_for_non_json() {
        let (cache, memory) = service();
        memory.set_ex("legacy", "plain text {", 60).await.unwrap();

        assert_eq!(
            cache.get("legacy").await,
            Some(Value::String("plain text {".to_string()))
        );
    }

    #[tokio::test]
    async fn test_expiry() {
        let (cache, _) = service();
        cache.set("short", &json!(1), 1).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(cache.get("short").await, None);
    }

    #[tokio::test]
    async fn test_typed_get() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Profile {
            name: String,
            karma: u32,
        }

        let (cache, _) = service();
        let profile = Profile {
            name: "ada".to_string(),
            karma: 7,
        };
        cache.cache_user("u1", &profile).await;

        assert_eq!(cache.get_as::<Profile>("users:u1").await, Some(profile));
        assert_eq!(cache.get_as::<Vec<u8>>("users:u1").await, None);
    }

    #[tokio::test]
    async fn test_delete_pattern_is_idempotent() {
        let (cache, memory) = service();
        cache.cache_notes_list(Some("java"), &json!([])).await;
        cache.cache_notes_list(None, &json!([])).await;

        assert!(cache.delete_pattern("notes:list:*").await);
        assert!(cache.delete_pattern("notes:list:*").await);
        assert!(memory.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_note_clears_lists() {
        let (cache, _) = service();
        cache.cache_note("123", &json!({ "id": "123" })).await;
        cache.cache_notes_list(Some("java"), &json!([{ "id": "123" }])).await;
        cache.cache_user("u1", &json!({ "id": "u1" })).await;

        assert!(cache.invalidate_note("123").await);

        assert_eq!(cache.get("notes:list:java").await, None);
        assert_eq!(cache.get_cached_note("123").await, None);
        assert!(cache.get_cached_user("u1").await.is_some());
    }

    async fn seed_all(cache: &CacheService) {
        cache.cache_note("1", &json!({ "id": "1" })).await;
        cache.cache_notes_list(None, &json!([])).await;
        cache.cache_user("u1", &json!({ "id": "u1" })).await;
        cache.cache_user("u2", &json!({ "id": "u2" })).await;
        cache.set("users:list:admins", &json!(["u1"]), 60).await;
        cache.set("users:list:all", &json!(["u1", "u2"]), 60).await;
        cache.cache_auth_token("u1", "jwt-1").await;
        cache.cache_auth_token("u2", "jwt-2").await;
        cache.cache_chat_messages("room-a", &json!([{ "text": "hi" }])).await;
        cache.cache_chat_messages("room-b", &json!([])).await;
        cache.cache_stats("global", &json!({ "notes": 1 })).await;
        cache.cache_stats("user:u1", &json!({ "notes": 1 })).await;
    }

    async fn remaining(memory: &MemoryStore) -> Vec<String> {
        let mut keys = memory.keys("*").await.unwrap();
        keys.sort();
        keys
    }

    fn all_but(removed: &[&str]) -> Vec<String> {
        let mut keys: Vec<String> = [
            "auth:u1",
            "auth:u2",
            "chat:room-a",
            "chat:room-b",
            "notes:1",
            "notes:list:all",
            "stats:global",
            "stats:user:u1",
            "users:list:admins",
            "users:list:all",
            "users:u1",
            "users:u2",
        ]
        .into_iter()
        .filter(|k| !removed.contains(k))
        .map(|k| k.to_string())
        .collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_invalidate_user_clears_record_and_user_lists() {
        let (cache, memory) = service();
        seed_all(&cache).await;

        assert!(cache.invalidate_user("u1").await);

        assert_eq!(
            remaining(&memory).await,
            all_but(&["users:u1", "users:list:admins", "users:list:all"])
        );
    }

    #[tokio::test]
    async fn test_invalidate_auth_token_is_single_key() {
        let (cache, memory) = service();
        seed_all(&cache).await;

        assert!(cache.invalidate_auth_token("u1").await);

        assert_eq!(remaining(&memory).await, all_but(&["auth:u1"]));
        assert_eq!(cache.get_cached_auth_token("u2").await, Some("jwt-2".to_string()));
    }

    #[tokio::test]
    async fn test_invalidate_chat_is_single_room() {
        let (cache, memory) = service();
        seed_all(&cache).await;

        assert!(cache.invalidate_chat("room-a").await);

        assert_eq!(remaining(&memory).await, all_but(&["chat:room-a"]));
    }

    #[tokio::test]
    async fn test_invalidate_stats_clears_whole_namespace() {
        let (cache, memory) = service();
        seed_all(&cache).await;

        assert!(cache.invalidate_stats().await);
        // Nothing left to match is still a success.
        assert!(cache.invalidate_stats().await);

        assert_eq!(
            remaining(&memory).await,
            all_but(&["stats:global", "stats:user:u1"])
        );
    }

    #[tokio::test]
    async fn test_domain_ttls() {
        let (cache, memory) = service();
        cache.cache_ocr_result("abc", &json!({ "text": "hi" })).await;
        cache.cache_notes_list(None, &json!([])).await;
        cache.cache_auth_token("u1", "tok").await;

        assert_eq!(memory.ttl("ocr:abc").await.unwrap(), 86_400);
        assert_eq!(memory.ttl("notes:list:all").await.unwrap(), 900);
        assert_eq!(memory.ttl("auth:u1").await.unwrap(), 604_800);
        assert_eq!(cache.get_cached_auth_token("u1").await, Some("tok".to_string()));
    }

    #[tokio::test]
    async fn test_fail_open_when_store_offline() {
        let (cache, memory) = service();
        cache.cache_note("1", &json!({ "id": "1" })).await;
        memory.set_offline(true);

        assert_eq!(cache.get_cached_note("1").await, None);
        assert!(!cache.cache_note("2", &json!({})).await);
        assert!(!cache.delete_pattern("notes:*").await);
        assert!(!cache.health_check().await);
        assert_eq!(cache.stats().errors, 4);
    }

    #[tokio::test]
    async fn test_disconnected_store_reads_as_empty() {
        let cache = CacheService::new(Arc::new(StoreHandle::disconnected()));

        assert_eq!(cache.get_cached_ocr_result("h").await, None);
        assert!(!cache.exists("h").await);
        assert_eq!(cache.ttl("h").await, None);
        assert_eq!(cache.stats().errors, 3);
    }

    #[tokio::test]
    async fn test_health_check_round_trip() {
        let (cache, memory) = service();
        assert!(cache.health_check().await);
        assert!(memory.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_or_set_computes_once() {
        let (cache, _) = service();
        let mut calls = 0;

        let first: Result<u32, ()> = cache
            .get_or_set("stats:notes", 60, || {
                calls += 1;
                async { Ok(42) }
            })
            .await;
        let second: Result<u32, ()> = cache
            .get_or_set("stats:notes", 60, || async { Ok(0) })
            .await;

        assert_eq!(first, Ok(42));
        assert_eq!(second, Ok(42));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_get_or_set_does_not_cache_errors() {
        let (cache, _) = service();
        let result: Result<u32, &str> = cache
            .get_or_set("stats:x", 60, || async { Err("boom") })
            .await;

        assert_eq!(result, Err("boom"));
        assert!(!cache.exists("stats:x").await);
    }

    #[tokio::test]
    async fn test_inspect_key() {
        let (cache, _) = service();
        cache.cache_stats("global", &json!({ "notes": 10 })).await;

        let inspection = cache.inspect_key("stats:global").await.unwrap().unwrap();
        assert_eq!(inspection.kind, "string");
        assert_eq!(inspection.ttl, 3600);
        assert_eq!(inspection.value, Some(json!({ "notes": 10 })));

        assert_eq!(cache.inspect_key("stats:none").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_pattern_counts_and_warm() {
        let (cache, _) = service();
        let items = vec![
            ("1".to_string(), json!({ "id": 1 })),
            ("2".to_string(), json!({ "id": 2 })),
        ];

        assert_eq!(cache.warm(EntityKind::Note, &items).await, 2);
        assert_eq!(
            cache.list_keys("notes:*").await.unwrap(),
            vec!["notes:1", "notes:2"]
        );
        assert_eq!(cache.clear_pattern("notes:*").await.unwrap(), 2);
        assert_eq!(cache.clear_pattern("notes:*").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let (cache, _) = service();
        cache.set("k", &json!("v"), 60).await;
        cache.get("k").await;
        cache.get("missing").await;

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z0-9 ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_set_then_get_returns_value(key in "[a-z:]{1,16}", value in json_value()) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let read = runtime.block_on(async {
                let (cache, _) = service();
                assert!(cache.set(&key, &value, 60).await);
                cache.get(&key).await
            });
            prop_assert_eq!(read, Some(value));
        }
    }
}
