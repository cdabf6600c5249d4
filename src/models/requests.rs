//! Request DTOs for the administrative API
//!
//! Defines the structure of incoming query strings and request bodies.

use serde::Deserialize;
use serde_json::Value;

use crate::cache::EntityKind;

/// Longest pattern or key accepted by the admin endpoints.
const MAX_PATTERN_LEN: usize = 256;

fn validate_pattern(pattern: &str) -> Option<String> {
    if pattern.is_empty() {
        return Some("Pattern cannot be empty".to_string());
    }
    if pattern.len() > MAX_PATTERN_LEN {
        return Some(format!(
            "Pattern exceeds maximum length of {} characters",
            MAX_PATTERN_LEN
        ));
    }
    None
}

/// Query of `GET /admin/cache/keys`. Lists everything when absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysQuery {
    #[serde(default)]
    pub pattern: Option<String>,
}

impl KeysQuery {
    pub fn pattern(&self) -> &str {
        self.pattern.as_deref().unwrap_or("*")
    }

    pub fn validate(&self) -> Option<String> {
        validate_pattern(self.pattern())
    }
}

/// Query of `DELETE /admin/cache`. The pattern is mandatory so a bare
/// DELETE cannot wipe the store.
#[derive(Debug, Clone, Deserialize)]
pub struct ClearQuery {
    pub pattern: String,
}

impl ClearQuery {
    pub fn validate(&self) -> Option<String> {
        validate_pattern(&self.pattern)
    }
}

/// One record to pre-populate.
#[derive(Debug, Clone, Deserialize)]
pub struct WarmItem {
    pub id: String,
    pub value: Value,
}

/// Body of `POST /admin/cache/warm`
#[derive(Debug, Clone, Deserialize)]
pub struct WarmRequest {
    pub kind: EntityKind,
    pub items: Vec<WarmItem>,
}

impl WarmRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.items.is_empty() {
            return Some("Items cannot be empty".to_string());
        }
        if self.items.iter().any(|item| item.id.is_empty()) {
            return Some("Item id cannot be empty".to_string());
        }
        None
    }

    pub fn into_pairs(self) -> Vec<(String, Value)> {
        self.items
            .into_iter()
            .map(|item| (item.id, item.value))
            .collect()
    }
}
