//! Rate Limit Module
//!
//! Fixed-window request counting per (route class, identifier), with
//! per-class quotas and fail-open behaviour when the store is unavailable.

mod identifier;
mod limiter;
mod policy;

// Re-export public types
pub use identifier::{
    by_network_origin, network_origin, resolve_identifier, IdentifierFn, Principal,
};
pub use limiter::{
    counter_key, retry_after_secs, system_clock, window_index, window_reset_ms, Clock,
    RateLimitDecision, RateLimiter, FAIL_OPEN_REMAINING,
};
pub use policy::{default_policy, QuotaTable, RatePolicy, RouteClass};
