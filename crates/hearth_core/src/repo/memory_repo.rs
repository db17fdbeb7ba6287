//! In-process document store.
//!
//! Used for ephemeral sessions and as the base for test doubles. Documents
//! keep insertion order so owner queries are deterministic.

use super::event_repo::{EventRepository, RepoError, RepoResult};
use crate::model::event::{Document, OwnerScope, RawRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct MemoryEventRepository {
    documents: Mutex<Vec<Document>>,
    next_id: AtomicU64,
}

impl MemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seeds a document with a caller-chosen id.
    pub fn seed(&self, id: impl Into<String>, data: RawRecord) -> RepoResult<()> {
        self.lock()?.push(Document::new(id, data));
        Ok(())
    }

    /// Snapshot of every stored document.
    pub fn documents(&self) -> Vec<Document> {
        self.lock().map(|docs| docs.clone()).unwrap_or_default()
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Vec<Document>>> {
        self.documents
            .lock()
            .map_err(|_| RepoError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl EventRepository for MemoryEventRepository {
    async fn query_by_owner(&self, scope: &OwnerScope, limit: u32) -> RepoResult<Vec<Document>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|doc| scope.matches_record(&doc.data))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn query_by_signature(
        &self,
        signature: &str,
        scope: &OwnerScope,
    ) -> RepoResult<Option<Document>> {
        Ok(self
            .lock()?
            .iter()
            .find(|doc| {
                doc.data.get("signature").and_then(Value::as_str) == Some(signature)
                    && scope.matches_record(&doc.data)
            })
            .cloned())
    }

    async fn get_by_id(&self, id: &str) -> RepoResult<Option<Document>> {
        Ok(self.lock()?.iter().find(|doc| doc.id == id).cloned())
    }

    async fn insert(&self, record: RawRecord) -> RepoResult<String> {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("doc-{seq:06}");
        self.lock()?.push(Document::new(id.clone(), record));
        Ok(id)
    }

    async fn merge(&self, id: &str, patch: RawRecord) -> RepoResult<()> {
        let mut docs = self.lock()?;
        let doc = docs
            .iter_mut()
            .find(|doc| doc.id == id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        doc.data.extend(patch);
        Ok(())
    }

    async fn remove(&self, id: &str) -> RepoResult<()> {
        let mut docs = self.lock()?;
        let before = docs.len();
        docs.retain(|doc| doc.id != id);
        if docs.len() == before {
            return Err(RepoError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
