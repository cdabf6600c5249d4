//! Route-class quota policy
//!
//! The static class -> (window, max) table consulted by both the counting
//! path and the header-reporting path.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

// == Route Class ==
/// Named policy bucket, independent of the concrete endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteClass {
    /// General API traffic
    General,
    /// Login / registration attempts
    Auth,
    /// Note reads
    Notes,
    /// Note uploads
    NotesUpload,
    /// Chat message sends
    Chat,
    /// OCR recognition requests
    Ocr,
    /// Administrative operations
    Admin,
    /// Unauthenticated public endpoints
    Public,
}

impl RouteClass {
    pub const ALL: [RouteClass; 8] = [
        RouteClass::General,
        RouteClass::Auth,
        RouteClass::Notes,
        RouteClass::NotesUpload,
        RouteClass::Chat,
        RouteClass::Ocr,
        RouteClass::Admin,
        RouteClass::Public,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RouteClass::General => "general",
            RouteClass::Auth => "auth",
            RouteClass::Notes => "notes",
            RouteClass::NotesUpload => "notesUpload",
            RouteClass::Chat => "chat",
            RouteClass::Ocr => "ocr",
            RouteClass::Admin => "admin",
            RouteClass::Public => "public",
        }
    }

    /// Resolves a class name, falling back to `general` for unknown names.
    pub fn resolve(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            debug!(class = name, "no quota configured for class, using general");
            RouteClass::General
        })
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RouteClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| format!("unknown route class '{}'", s))
    }
}

// == Rate Policy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatePolicy {
    pub window_secs: u64,
    pub max_requests: u32,
}

impl RatePolicy {
    pub const fn new(window_secs: u64, max_requests: u32) -> Self {
        Self {
            window_secs,
            max_requests,
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_secs as i64 * 1000
    }
}

const MINUTE: u64 = 60;

/// Built-in quotas per class.
pub fn default_policy(class: RouteClass) -> RatePolicy {
    match class {
        RouteClass::General => RatePolicy::new(15 * MINUTE, 100),
        RouteClass::Auth => RatePolicy::new(15 * MINUTE, 5),
        RouteClass::Notes => RatePolicy::new(MINUTE, 30),
        RouteClass::NotesUpload => RatePolicy::new(MINUTE, 3),
        RouteClass::Chat => RatePolicy::new(MINUTE, 25),
        RouteClass::Ocr => RatePolicy::new(MINUTE, 5),
        RouteClass::Admin => RatePolicy::new(MINUTE, 100),
        RouteClass::Public => RatePolicy::new(MINUTE, 60),
    }
}

// == Quota Table ==
/// Immutable class -> policy map. Classes missing from the table use the
/// `general` policy.
#[derive(Debug, Clone)]
pub struct QuotaTable {
    policies: HashMap<RouteClass, RatePolicy>,
}

impl QuotaTable {
    /// Builds a table from explicit entries. A missing `general` entry is
    /// filled with the built-in default so fallback always resolves.
    pub fn new(entries: impl IntoIterator<Item = (RouteClass, RatePolicy)>) -> Self {
        let mut policies: HashMap<_, _> = entries.into_iter().collect();
        policies
            .entry(RouteClass::General)
            .or_insert_with(|| default_policy(RouteClass::General));
        Self { policies }
    }

    pub fn policy(&self, class: RouteClass) -> RatePolicy {
        match self.policies.get(&class) {
            Some(policy) => *policy,
            None => {
                debug!(class = %class, "no quota configured for class, using general");
                self.policies[&RouteClass::General]
            }
        }
    }

    /// Every configured class with its policy, in a stable order.
    pub fn entries(&self) -> Vec<(RouteClass, RatePolicy)> {
        RouteClass::ALL
            .into_iter()
            .filter_map(|class| self.policies.get(&class).map(|p| (class, *p)))
            .collect()
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self::new(RouteClass::ALL.map(|class| (class, default_policy(class))))
    }
}
