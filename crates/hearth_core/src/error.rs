//! Coordinator error taxonomy.
//!
//! Duplicate detection and an open circuit breaker are outcomes, not errors;
//! see `AddOutcome::is_duplicate` and `ListSource::CircuitOpen`.

use crate::queue::QueueError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Missing identity or owner.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("event not found: {0}")]
    NotFound(String),
    /// Another call with the same key is still outstanding.
    #[error("request already in progress: {key}")]
    RequestInProgress { key: String },
    /// The remote write failed; `queued` tells whether it was kept for replay.
    #[error("persistence failure: {message}")]
    Persistence { message: String, queued: bool },
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl StoreError {
    /// Stable machine-readable code for envelopes and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::RequestInProgress { .. } => "request_in_progress",
            Self::Persistence { .. } => "persistence_failure",
            Self::Queue(_) => "queue_failure",
        }
    }

    /// Whether the intended write is durably queued for replay.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Persistence { queued: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::StoreError;

    #[test]
    fn codes_are_stable() {
        assert_eq!(StoreError::Validation("x".into()).code(), "validation_error");
        assert_eq!(
            StoreError::RequestInProgress {
                key: "update:evt1".into()
            }
            .code(),
            "request_in_progress"
        );
        let queued = StoreError::Persistence {
            message: "offline".into(),
            queued: true,
        };
        assert_eq!(queued.code(), "persistence_failure");
        assert!(queued.is_queued());
        assert!(!StoreError::NotFound("evt1".into()).is_queued());
    }
}
