//! Cache key space
//!
//! Every cache write and every invalidation builds its key through the
//! functions here, so the two always agree on the exact string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// == Default TTLs (seconds) ==
pub const NOTE_TTL: u64 = 30 * 60;
pub const LIST_TTL: u64 = 15 * 60;
pub const USER_TTL: u64 = 60 * 60;
pub const AUTH_TOKEN_TTL: u64 = 7 * 24 * 60 * 60;
pub const CHAT_TTL: u64 = 30 * 60;
/// OCR output is immutable for a given input hash
pub const OCR_TTL: u64 = 24 * 60 * 60;
pub const STATS_TTL: u64 = 60 * 60;

/// Filter segment used for unfiltered list views.
pub const ALL_FILTER: &str = "all";

// == Entity Kind ==
/// Entity classes that own a cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Note,
    User,
    AuthToken,
    Chat,
    Ocr,
    Stats,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Note,
        EntityKind::User,
        EntityKind::AuthToken,
        EntityKind::Chat,
        EntityKind::Ocr,
        EntityKind::Stats,
    ];

    /// Namespace prefix, including the trailing separator.
    pub fn prefix(self) -> &'static str {
        match self {
            EntityKind::Note => "notes:",
            EntityKind::User => "users:",
            EntityKind::AuthToken => "auth:",
            EntityKind::Chat => "chat:",
            EntityKind::Ocr => "ocr:",
            EntityKind::Stats => "stats:",
        }
    }

    /// TTL applied to single records of this kind.
    pub fn default_ttl(self) -> u64 {
        match self {
            EntityKind::Note => NOTE_TTL,
            EntityKind::User => USER_TTL,
            EntityKind::AuthToken => AUTH_TOKEN_TTL,
            EntityKind::Chat => CHAT_TTL,
            EntityKind::Ocr => OCR_TTL,
            EntityKind::Stats => STATS_TTL,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Note => "note",
            EntityKind::User => "user",
            EntityKind::AuthToken => "authToken",
            EntityKind::Chat => "chat",
            EntityKind::Ocr => "ocr",
            EntityKind::Stats => "stats",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" | "notes" => Ok(EntityKind::Note),
            "user" | "users" => Ok(EntityKind::User),
            "authToken" | "auth" => Ok(EntityKind::AuthToken),
            "chat" => Ok(EntityKind::Chat),
            "ocr" => Ok(EntityKind::Ocr),
            "stats" => Ok(EntityKind::Stats),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

// == Key Builders ==
/// `${prefix}${id}`
pub fn entity_key(kind: EntityKind, id: &str) -> String {
    format!("{}{}", kind.prefix(), id)
}

/// `${prefix}list:${filter|"all"}`
pub fn list_key(kind: EntityKind, filter: Option<&str>) -> String {
    let filter = filter.filter(|f| !f.is_empty()).unwrap_or(ALL_FILTER);
    format!("{}list:{}", kind.prefix(), filter)
}

/// Pattern covering every list view of `kind`.
pub fn list_pattern(kind: EntityKind) -> String {
    format!("{}list:*", kind.prefix())
}

/// Pattern covering the whole namespace of `kind`.
pub fn namespace_pattern(kind: EntityKind) -> String {
    format!("{}*", kind.prefix())
}
