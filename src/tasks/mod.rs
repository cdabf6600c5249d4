//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweep: removes expired entries from the in-process stores

mod cleanup;

pub use cleanup::{spawn_cleanup_task, ExpirySweep};
