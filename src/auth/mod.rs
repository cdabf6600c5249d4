//! Auth Module
//!
//! Credential revocation bookkeeping. Token issuing and verification live
//! in the application's auth layer.

mod blacklist;

pub use blacklist::{
    revocation_key, select_blacklist, BlacklistStore, MemoryBlacklist, StoreBlacklist,
};
