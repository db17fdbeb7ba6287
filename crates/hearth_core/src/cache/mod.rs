//! Session-lifetime event cache.
//!
//! # Responsibility
//! - Keep normalized events addressable by any identity.
//! - Back local duplicate checks and throttled reads.
//!
//! # Invariants
//! - Only the coordinator mutates the cache; callers receive clones.

pub mod event_cache;

pub use event_cache::{EventCache, QuerySnapshot};
