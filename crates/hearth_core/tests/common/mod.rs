#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hearth_core::{
    Document, EventRepository, EventStore, ManualClock, MemoryEventRepository,
    MemoryPendingWriteStore, OwnerScope, RawRecord, RepoError, RepoResult, StoreConfig,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const QUERY_BY_OWNER: &str = "query_by_owner";
pub const QUERY_BY_SIGNATURE: &str = "query_by_signature";
pub const GET_BY_ID: &str = "get_by_id";
pub const INSERT: &str = "insert";
pub const MERGE: &str = "merge";
pub const REMOVE: &str = "remove";

/// Memory-backed adapter that counts calls, fails on demand and can hold a
/// call open until released.
#[derive(Default)]
pub struct ScriptedRepository {
    inner: MemoryEventRepository,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, usize>>,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryEventRepository {
        &self.inner
    }

    pub fn seed(&self, id: &str, data: serde_json::Value) {
        self.inner.seed(id, record(data)).unwrap();
    }

    /// Makes the next `times` calls of `method` fail as unavailable.
    pub fn fail_next(&self, method: &'static str, times: usize) {
        self.failures.lock().unwrap().insert(method, times);
    }

    pub fn calls(&self, method: &'static str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    /// Holds the next call of `method` until the returned handle is
    /// notified.
    pub fn hold(&self, method: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(method, gate.clone());
        gate
    }

    async fn enter(&self, method: &'static str) -> RepoResult<()> {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;

        let gate = self.gates.lock().unwrap().remove(method);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(method) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(RepoError::Unavailable(format!("{method} scripted failure")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EventRepository for ScriptedRepository {
    async fn query_by_owner(&self, scope: &OwnerScope, limit: u32) -> RepoResult<Vec<Document>> {
        self.enter(QUERY_BY_OWNER).await?;
        self.inner.query_by_owner(scope, limit).await
    }

    async fn query_by_signature(
        &self,
        signature: &str,
        scope: &OwnerScope,
    ) -> RepoResult<Option<Document>> {
        self.enter(QUERY_BY_SIGNATURE).await?;
        self.inner.query_by_signature(signature, scope).await
    }

    async fn get_by_id(&self, id: &str) -> RepoResult<Option<Document>> {
        self.enter(GET_BY_ID).await?;
        self.inner.get_by_id(id).await
    }

    async fn insert(&self, record: RawRecord) -> RepoResult<String> {
        self.enter(INSERT).await?;
        self.inner.insert(record).await
    }

    async fn merge(&self, id: &str, patch: RawRecord) -> RepoResult<()> {
        self.enter(MERGE).await?;
        self.inner.merge(id, patch).await
    }

    async fn remove(&self, id: &str) -> RepoResult<()> {
        self.enter(REMOVE).await?;
        self.inner.remove(id).await
    }
}

pub struct Harness {
    pub store: EventStore,
    pub repo: Arc<ScriptedRepository>,
    pub pending: Arc<MemoryPendingWriteStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(StoreConfig::default())
}

pub fn harness_with(config: StoreConfig) -> Harness {
    let repo = Arc::new(ScriptedRepository::new());
    let pending = Arc::new(MemoryPendingWriteStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap(),
    ));
    let store = EventStore::with_clock(repo.clone(), pending.clone(), config, clock.clone());
    Harness {
        store,
        repo,
        pending,
        clock,
    }
}

pub fn record(value: serde_json::Value) -> RawRecord {
    value.as_object().cloned().expect("test record must be an object")
}
