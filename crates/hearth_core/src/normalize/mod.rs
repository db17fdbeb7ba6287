//! Event normalization.
//!
//! # Responsibility
//! - Turn loosely-shaped input into canonical `Event` values.
//! - Compute the content signature used for deduplication.
//!
//! # See also
//! - `model::raw` for the accepted input keys.

pub mod normalizer;
pub mod signature;

pub use normalizer::{parse_time, Normalizer};
pub use signature::{event_signature, string_hash};
