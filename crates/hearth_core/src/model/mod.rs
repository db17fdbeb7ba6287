//! Event domain model.
//!
//! # Responsibility
//! - Define the raw input shape, the canonical `Event`, and update patches.
//! - Keep identity and scoping helpers next to the data they describe.
//!
//! # Invariants
//! - Every canonical event is addressable by `id`, `store_id` or
//!   `universal_id`.
//! - Raw input is never mutated by normalization.

pub mod event;
pub mod patch;
pub mod raw;
