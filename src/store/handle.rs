//! Store Handle
//!
//! Lifecycle wrapper around a [`KeyValueStore`] backend: bounded-backoff
//! connect, readiness flag, graceful disconnect, and a timeout around every
//! command. Callers check [`StoreHandle::is_ready`] (or just handle the
//! `Unavailable` error) and fail open.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{KeyValueStore, MemoryStore, RedisStore};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};

type ConnectFuture = Pin<Box<dyn Future<Output = StoreResult<Arc<dyn KeyValueStore>>> + Send>>;

/// Produces a fresh backend session on each call.
pub type Connector = Arc<dyn Fn() -> ConnectFuture + Send + Sync>;

/// Wraps an async closure as a [`Connector`].
pub fn connector_fn<F, Fut>(f: F) -> Connector
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StoreResult<Arc<dyn KeyValueStore>>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as ConnectFuture)
}

/// Connector that hands back the same in-process backend every time.
fn reuse(backend: Arc<dyn KeyValueStore>) -> Connector {
    connector_fn(move || {
        let backend = backend.clone();
        async move { Ok::<_, StoreError>(backend) }
    })
}

// == Retry Policy ==
/// Reconnect policy for [`StoreHandle::connect`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt before giving up
    pub max_retries: u32,
    /// Bound on every individual store command
    pub command_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            command_timeout: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.store_max_retries,
            command_timeout: Duration::from_millis(config.store_timeout_ms),
        }
    }
}

/// Delay before retry number `attempt` (1-based): `min(attempt * 100ms, 3s)`.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis((u64::from(attempt) * 100).min(3000))
}

// == Store Handle ==
pub struct StoreHandle {
    backend: RwLock<Option<Arc<dyn KeyValueStore>>>,
    ready: AtomicBool,
    connector: Option<Connector>,
    policy: RetryPolicy,
}

impl StoreHandle {
    /// Creates an unconnected handle; call [`connect`](Self::connect) next.
    pub fn new(connector: Connector, policy: RetryPolicy) -> Self {
        Self {
            backend: RwLock::new(None),
            ready: AtomicBool::new(false),
            connector: Some(connector),
            policy,
        }
    }

    /// Unconnected handle for a Redis server at `url`.
    pub fn redis(url: impl Into<String>, policy: RetryPolicy) -> Self {
        let url = url.into();
        let connector = connector_fn(move || {
            let url = url.clone();
            async move {
                let session: StoreResult<RedisStore> = RedisStore::connect(&url).await;
                session.map(|store| Arc::new(store) as Arc<dyn KeyValueStore>)
            }
        });
        Self::new(connector, policy)
    }

    /// Unconnected handle over an in-process store.
    pub fn memory(store: Arc<MemoryStore>, policy: RetryPolicy) -> Self {
        Self::new(reuse(store), policy)
    }

    /// Handle that is already connected to `backend`.
    pub fn with_backend(backend: Arc<dyn KeyValueStore>, policy: RetryPolicy) -> Self {
        Self {
            backend: RwLock::new(Some(backend.clone())),
            ready: AtomicBool::new(true),
            connector: Some(reuse(backend)),
            policy,
        }
    }

    /// Handle with no backend at all; every command is `Unavailable`.
    pub fn disconnected() -> Self {
        Self {
            backend: RwLock::new(None),
            ready: AtomicBool::new(false),
            connector: None,
            policy: RetryPolicy::default(),
        }
    }

    // == Lifecycle ==
    /// Establishes a session, retrying with [`backoff_delay`] until
    /// `max_retries` retries have failed.
    pub async fn connect(&self) -> StoreResult<()> {
        let Some(connector) = self.connector.as_ref() else {
            return Err(StoreError::Unavailable);
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match connector().await {
                Ok(backend) => {
                    self.install(Some(backend));
                    info!(attempt, "Key-value store session established");
                    return Ok(());
                }
                Err(e) if attempt > self.policy.max_retries => {
                    warn!(attempt, error = %e, "Giving up on key-value store connection");
                    return Err(StoreError::ConnectFailed { attempts: attempt });
                }
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Key-value store connection failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Drops the current session and connects again.
    pub async fn reconnect(&self) -> StoreResult<()> {
        self.disconnect().await;
        self.connect().await
    }

    /// Closes the session. Calling it on a closed handle is a no-op.
    pub async fn disconnect(&self) {
        if self.install(None) {
            info!("Key-value store session closed");
        } else {
            debug!("Key-value store already disconnected");
        }
    }

    /// True only while a session is installed and its last call did not
    /// fail with a connection-class error.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn has_session(&self) -> bool {
        self.backend.read().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Tracks session health from call outcomes. Commands keep flowing while
    /// not ready, so a backend that reconnects on its own is noticed on the
    /// next successful call.
    fn observe<T>(&self, result: &StoreResult<T>) {
        match result {
            Ok(_) => {
                if self.has_session() && !self.ready.swap(true, Ordering::SeqCst) {
                    info!("Key-value store responding again");
                }
            }
            Err(e) if e.is_connection_loss() => {
                if self.ready.swap(false, Ordering::SeqCst) {
                    warn!(error = %e, "Key-value store session lost");
                }
            }
            Err(_) => {}
        }
    }

    /// Swaps the backend, returning whether one was previously installed.
    fn install(&self, backend: Option<Arc<dyn KeyValueStore>>) -> bool {
        let ready = backend.is_some();
        let previous = match self.backend.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, backend),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), backend),
        };
        self.ready.store(ready, Ordering::SeqCst);
        previous.is_some()
    }

    fn backend(&self) -> StoreResult<Arc<dyn KeyValueStore>> {
        self.backend
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(StoreError::Unavailable)
    }

    async fn bounded<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        let limit = self.policy.command_timeout;
        let result = match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(limit.as_millis() as u64)),
        };
        self.observe(&result);
        result
    }

    // == Commands ==
    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let store = self.backend()?;
        self.bounded(store.get(key)).await
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let store = self.backend()?;
        self.bounded(store.set_ex(key, value, ttl_secs)).await
    }

    pub async fn incr(&self, key: &str) -> StoreResult<i64> {
        let store = self.backend()?;
        self.bounded(store.incr(key)).await
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool> {
        let store = self.backend()?;
        self.bounded(store.expire(key, ttl_secs)).await
    }

    pub async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        let store = self.backend()?;
        self.bounded(store.del(keys)).await
    }

    pub async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let store = self.backend()?;
        self.bounded(store.keys(pattern)).await
    }

    pub async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let store = self.backend()?;
        self.bounded(store.ttl(key)).await
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        let store = self.backend()?;
        self.bounded(store.exists(key)).await
    }

    pub async fn key_type(&self, key: &str) -> StoreResult<String> {
        let store = self.backend()?;
        self.bounded(store.key_type(key)).await
    }

    pub async fn ping(&self) -> StoreResult<()> {
        let store = self.backend()?;
        self.bounded(store.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio_test::{assert_err, assert_ok};

    fn flaky_connector(failures: u32, calls: Arc<AtomicU32>) -> Connector {
        connector_fn(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(StoreError::Unavailable)
                } else {
                    Ok(Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>)
                }
            }
        })
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            command_timeout: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_backoff_delay_is_linear_then_capped() {
        assert_eq!(backoff_delay(1), Duration::from_millis(100));
        assert_eq!(backoff_delay(5), Duration::from_millis(500));
        assert_eq!(backoff_delay(30), Duration::from_millis(3000));
        assert_eq!(backoff_delay(31), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let handle = StoreHandle::new(flaky_connector(3, calls.clone()), policy(10));
        assert!(!handle.is_ready());

        let started = tokio::time::Instant::now();
        assert_ok!(handle.connect().await);

        assert!(handle.is_ready());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 100 + 200 + 300 ms of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_cap() {
        let calls = Arc::new(AtomicU32::new(0));
        let handle = StoreHandle::new(flaky_connector(u32::MAX, calls.clone()), policy(2));

        let result = handle.connect().await;

        assert!(matches!(result, Err(StoreError::ConnectFailed { attempts: 3 })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!handle.is_ready());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let handle = StoreHandle::with_backend(Arc::new(MemoryStore::new()), policy(0));
        assert!(handle.is_ready());

        handle.disconnect().await;
        handle.disconnect().await;

        assert!(!handle.is_ready());
        assert_err!(handle.get("k").await);
    }

    #[tokio::test]
    async fn test_reconnect_restores_session() {
        let handle = StoreHandle::with_backend(Arc::new(MemoryStore::new()), policy(0));
        handle.disconnect().await;

        assert_ok!(handle.reconnect().await);

        assert!(handle.is_ready());
        assert_ok!(handle.ping().await);
    }

    #[tokio::test]
    async fn test_memory_handle_connects_to_given_store() {
        let store = Arc::new(MemoryStore::new());
        let handle = StoreHandle::memory(store.clone(), policy(0));
        assert!(!handle.is_ready());

        assert_ok!(handle.connect().await);
        assert_ok!(handle.set_ex("shared", "1", 60).await);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_disconnected_handle_is_unavailable() {
        let handle = StoreHandle::disconnected();
        assert!(!handle.is_ready());
        assert!(matches!(handle.connect().await, Err(StoreError::Unavailable)));
        assert!(matches!(handle.incr("k").await, Err(StoreError::Unavailable)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_command_times_out() {
        let store = Arc::new(MemoryStore::new());
        store.set_latency(Duration::from_secs(5));
        let handle = StoreHandle::with_backend(store, policy(0));

        let result = handle.get("k").await;
        assert!(matches!(result, Err(StoreError::Timeout(250))));
    }

    #[tokio::test]
    async fn test_commands_pass_through() {
        let handle = StoreHandle::with_backend(Arc::new(MemoryStore::new()), policy(0));
        handle.set_ex("a", "1", 60).await.unwrap();

        assert_eq!(handle.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(handle.incr("a").await.unwrap(), 2);
        assert!(handle.exists("a").await.unwrap());
        assert_eq!(handle.keys("*").await.unwrap(), vec!["a".to_string()]);
        assert_eq!(handle.del(&["a".to_string()]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_readiness_follows_backend_health() {
        let store = Arc::new(MemoryStore::new());
        let handle = StoreHandle::with_backend(store.clone(), policy(0));
        assert!(handle.is_ready());

        store.set_offline(true);
        for _ in 0..4 {
            assert_err!(handle.get("k").await);
        }
        assert!(!handle.is_ready());

        // The session comes back on its own; the next call notices.
        store.set_offline(false);
        assert_ok!(handle.ping().await);
        assert!(handle.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_readiness() {
        let store = Arc::new(MemoryStore::new());
        store.set_latency(Duration::from_secs(5));
        let handle = StoreHandle::with_backend(store, policy(0));

        assert_err!(handle.get("k").await);
        assert!(!handle.is_ready());
    }

    #[tokio::test]
    async fn test_command_errors_keep_readiness() {
        let handle = StoreHandle::with_backend(Arc::new(MemoryStore::new()), policy(0));
        handle.set_ex("text", "abc", 60).await.unwrap();

        assert!(matches!(handle.incr("text").await, Err(StoreError::WrongType(_))));
        assert!(handle.is_ready());
    }

    #[tokio::test]
    async fn test_success_after_disconnect_stays_unready() {
        let handle = StoreHandle::with_backend(Arc::new(MemoryStore::new()), policy(0));
        handle.disconnect().await;

        handle.observe(&Ok(()));
        assert!(!handle.is_ready());
    }
}
