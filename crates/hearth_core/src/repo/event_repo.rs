//! Persistence adapter contract.
//!
//! # Responsibility
//! - Describe the read/write/query surface the coordinator needs from the
//!   remote document store.
//! - Keep records untyped at this boundary; meaning is assigned by the
//!   normalizer.
//!
//! # Invariants
//! - `insert` returns the remote-assigned document id.
//! - `merge` and `remove` report `NotFound` for unknown ids.

use crate::db::DbError;
use crate::model::event::{Document, OwnerScope, RawRecord};
use async_trait::async_trait;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("document not found: {0}")]
    NotFound(String),
    /// Transport-level failure (timeout, offline, remote rejected).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid stored document: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}

/// Remote document store operations used by the event store.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Documents belonging to `scope`, oldest first, at most `limit`.
    async fn query_by_owner(&self, scope: &OwnerScope, limit: u32) -> RepoResult<Vec<Document>>;

    /// First document with `signature` inside `scope`.
    async fn query_by_signature(
        &self,
        signature: &str,
        scope: &OwnerScope,
    ) -> RepoResult<Option<Document>>;

    async fn get_by_id(&self, id: &str) -> RepoResult<Option<Document>>;

    /// Stores a new document and returns its id.
    async fn insert(&self, record: RawRecord) -> RepoResult<String>;

    /// Shallow-merges `patch` onto the stored document.
    async fn merge(&self, id: &str, patch: RawRecord) -> RepoResult<()>;

    async fn remove(&self, id: &str) -> RepoResult<()>;
}
