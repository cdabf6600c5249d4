//! Fixed-window rate limiter
//!
//! One counter per (class, identifier, window index) in the shared store.
//! The counter's TTL is refreshed on every increment, so under a sustained
//! burst a counter can outlive its nominal window slightly; a new window
//! always uses a new key, so this never leaks into the next window's count.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::policy::{QuotaTable, RatePolicy, RouteClass};
use crate::error::{StoreError, StoreResult};
use crate::store::StoreHandle;

/// Remaining count reported when the store is unavailable.
pub const FAIL_OPEN_REMAINING: u32 = 999;

// == Decision ==
/// Outcome of a limit check, also used for side-effect-free status reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Start of the next window, Unix milliseconds
    pub reset_time: i64,
    /// Seconds until the next window, set only when denied
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    /// Reset time in whole Unix seconds, as sent in `X-RateLimit-Reset`.
    pub fn reset_secs(&self) -> i64 {
        self.reset_time.div_euclid(1000)
    }

    fn fail_open(policy: RatePolicy, now_ms: i64) -> Self {
        Self {
            allowed: true,
            limit: policy.max_requests,
            remaining: FAIL_OPEN_REMAINING,
            reset_time: now_ms + policy.window_ms(),
            retry_after: None,
        }
    }
}

// == Window Arithmetic ==
/// `floor(now / window)`
pub fn window_index(now_ms: i64, window_secs: u64) -> i64 {
    now_ms.div_euclid(window_secs.max(1) as i64 * 1000)
}

/// Start of the window after `index`, Unix milliseconds.
pub fn window_reset_ms(index: i64, window_secs: u64) -> i64 {
    (index + 1) * window_secs.max(1) as i64 * 1000
}

/// `ceil((reset - now) / 1000)`, never below 1 second.
pub fn retry_after_secs(reset_ms: i64, now_ms: i64) -> u64 {
    let remaining_ms = (reset_ms - now_ms).max(0);
    ((remaining_ms + 999) / 1000).max(1) as u64
}

/// `ratelimit:<class>:<identifier>:<windowIndex>`
pub fn counter_key(class: RouteClass, identifier: &str, index: i64) -> String {
    format!("ratelimit:{}:{}:{}", class, identifier, index)
}

/// Source of the current time in Unix milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock.
pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_millis())
}

fn parse_count(raw: Option<String>) -> u32 {
    raw.and_then(|v| v.parse().ok()).unwrap_or(0)
}

// == Rate Limiter ==
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<StoreHandle>,
    quotas: Arc<QuotaTable>,
    clock: Clock,
}

impl RateLimiter {
    /// Limiter with the built-in quotas.
    pub fn new(store: Arc<StoreHandle>) -> Self {
        Self::with_quotas(store, QuotaTable::default())
    }

    pub fn with_quotas(store: Arc<StoreHandle>, quotas: QuotaTable) -> Self {
        Self {
            store,
            quotas: Arc::new(quotas),
            clock: system_clock(),
        }
    }

    /// Replaces the wall clock, e.g. with a manually advanced one.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now_ms(&self) -> i64 {
        (self.clock)()
    }

    /// Counts one request against `identifier`'s quota for `class`.
    pub async fn check_limit(&self, identifier: &str, class: RouteClass) -> RateLimitDecision {
        self.check_limit_at(identifier, class, self.now_ms()).await
    }

    /// [`check_limit`](Self::check_limit) against an explicit clock reading.
    pub async fn check_limit_at(
        &self,
        identifier: &str,
        class: RouteClass,
        now_ms: i64,
    ) -> RateLimitDecision {
        let policy = self.quotas.policy(class);
        match self.count_request(identifier, class, policy, now_ms).await {
            Ok(decision) => decision,
            Err(e) => {
                log_fail_open(class, identifier, &e);
                RateLimitDecision::fail_open(policy, now_ms)
            }
        }
    }

    async fn count_request(
        &self,
        identifier: &str,
        class: RouteClass,
        policy: RatePolicy,
        now_ms: i64,
    ) -> StoreResult<RateLimitDecision> {
        let index = window_index(now_ms, policy.window_secs);
        let key = counter_key(class, identifier, index);
        let reset_time = window_reset_ms(index, policy.window_secs);

        // Check-then-act: concurrent requests may both pass the read, which
        // is accepted for a limiter.
        let count = parse_count(self.store.get(&key).await?);
        if count >= policy.max_requests {
            let retry_after = retry_after_secs(reset_time, now_ms);
            info!(
                class = %class,
                identifier,
                limit = policy.max_requests,
                retry_after,
                "rate limit exceeded"
            );
            return Ok(RateLimitDecision {
                allowed: false,
                limit: policy.max_requests,
                remaining: 0,
                reset_time,
                retry_after: Some(retry_after),
            });
        }

        let counted = self.store.incr(&key).await?;
        self.store.expire(&key, policy.window_secs).await?;

        let counted = u32::try_from(counted).unwrap_or(u32::MAX);
        let decision = RateLimitDecision {
            allowed: true,
            limit: policy.max_requests,
            remaining: policy.max_requests.saturating_sub(counted),
            reset_time,
            retry_after: None,
        };
        debug!(class = %class, identifier, remaining = decision.remaining, "request counted");
        Ok(decision)
    }

    /// Current quota state without counting a request.
    pub async fn get_limit_info(&self, identifier: &str, class: RouteClass) -> RateLimitDecision {
        self.get_limit_info_at(identifier, class, self.now_ms()).await
    }

    pub async fn get_limit_info_at(
        &self,
        identifier: &str,
        class: RouteClass,
        now_ms: i64,
    ) -> RateLimitDecision {
        let policy = self.quotas.policy(class);
        let index = window_index(now_ms, policy.window_secs);
        let key = counter_key(class, identifier, index);
        let reset_time = window_reset_ms(index, policy.window_secs);

        match self.store.get(&key).await {
            Ok(raw) => {
                let count = parse_count(raw);
                let allowed = count < policy.max_requests;
                RateLimitDecision {
                    allowed,
                    limit: policy.max_requests,
                    remaining: policy.max_requests.saturating_sub(count),
                    reset_time,
                    retry_after: (!allowed).then(|| retry_after_secs(reset_time, now_ms)),
                }
            }
            Err(e) => {
                log_fail_open(class, identifier, &e);
                RateLimitDecision::fail_open(policy, now_ms)
            }
        }
    }

    /// Deletes the current window's counter for `identifier`.
    pub async fn reset_limit(&self, identifier: &str, class: RouteClass) -> StoreResult<bool> {
        self.reset_limit_at(identifier, class, self.now_ms()).await
    }

    pub async fn reset_limit_at(
        &self,
        identifier: &str,
        class: RouteClass,
        now_ms: i64,
    ) -> StoreResult<bool> {
        let policy = self.quotas.policy(class);
        let key = counter_key(class, identifier, window_index(now_ms, policy.window_secs));
        let removed = self.store.del(&[key]).await?;
        info!(class = %class, identifier, removed, "rate limit counter reset");
        Ok(removed > 0)
    }

    /// Deletes every counter of `class`, across identifiers and windows.
    pub async fn reset_class(&self, class: RouteClass) -> StoreResult<u64> {
        let keys = self.store.keys(&format!("ratelimit:{}:*", class)).await?;
        let removed = if keys.is_empty() {
            0
        } else {
            self.store.del(&keys).await?
        };
        info!(class = %class, removed, "rate limit counters reset");
        Ok(removed)
    }
}

fn log_fail_open(class: RouteClass, identifier: &str, err: &StoreError) {
    match err {
        StoreError::Unavailable => {
            debug!(class = %class, identifier, "rate limiter bypassed, store unavailable")
        }
        other => warn!(
            class = %class,
            identifier,
            error = %other,
            "rate limiter store failure, allowing request"
        ),
    }
}
