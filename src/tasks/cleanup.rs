//! Expiry Sweep Task
//!
//! Background task that periodically drops expired entries from the
//! in-process stores. Lookups already ignore expired entries, so the sweep
//! only bounds memory use.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::auth::MemoryBlacklist;
use crate::store::MemoryStore;

/// In-process state whose expired entries must be removed periodically.
#[async_trait]
pub trait ExpirySweep: Send + Sync {
    /// Label for log output.
    fn name(&self) -> &'static str;

    /// Removes expired entries. Returns the number removed.
    async fn sweep(&self) -> usize;
}

#[async_trait]
impl ExpirySweep for MemoryStore {
    fn name(&self) -> &'static str {
        "memory-store"
    }

    async fn sweep(&self) -> usize {
        self.cleanup_expired().await
    }
}

#[async_trait]
impl ExpirySweep for MemoryBlacklist {
    fn name(&self) -> &'static str {
        "memory-blacklist"
    }

    async fn sweep(&self) -> usize {
        self.cleanup_expired().await
    }
}

/// Spawns a task that sweeps every target each `cleanup_interval_secs`.
///
/// The returned handle is aborted during graceful shutdown.
pub fn spawn_cleanup_task(
    targets: Vec<Arc<dyn ExpirySweep>>,
    cleanup_interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            targets = targets.len(),
            "Starting expiry sweep with interval of {} seconds", cleanup_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            for target in &targets {
                let removed = target.sweep().await;
                if removed > 0 {
                    info!(target = target.name(), removed, "expiry sweep removed entries");
                } else {
                    debug!(target = target.name(), "expiry sweep found nothing to remove");
                }
            }
        }
    })
}
