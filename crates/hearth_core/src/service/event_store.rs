//! Request coordinator for the event store.
//!
//! # Responsibility
//! - Front every read and write against the document store.
//! - Normalize input, suppress duplicate inserts, keep the cache current and
//!   fan out one notification per persisted mutation.
//! - Protect the store from UI-driven storms: one request per key, a read
//!   throttle per query scope, and an empty-result circuit breaker.
//! - Queue failed writes durably and replay them on startup.
//!
//! # Invariants
//! - Mutations on the same identity never overlap (`add:`, `update:`,
//!   `delete:` guard keys).
//! - A remote query for a scope is issued at most once per refresh interval.
//! - Successful mutations notify exactly once (subject to debounce).
//! - No internal lock is held across an adapter call.

use super::guard::{BreakerState, EmptyResultBreaker, InFlightGuard, InFlightTicket};
use crate::cache::EventCache;
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::event::{DateRange, Document, Event, EventAction, OwnerScope, RawRecord};
use crate::model::patch::EventPatch;
use crate::model::raw::RawEvent;
use crate::normalize::Normalizer;
use crate::notify::{ChangeBroadcast, Notifier, Subscription};
use crate::queue::{PendingOp, PendingWrite, PendingWriteStore, QueuedWrite};
use crate::repo::event_repo::{EventRepository, RepoError};
use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};

/// Result of [`EventStore::add`].
#[derive(Debug, Clone, PartialEq)]
pub struct AddOutcome {
    pub event: Event,
    /// The store already held an event with the same signature in scope;
    /// `event` is that existing record and nothing was inserted.
    pub is_duplicate: bool,
}

/// Where a list result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListSource {
    Remote,
    /// Within the refresh interval; last-known-good result reused.
    Throttled,
    /// Same query already running; last-known-good result reused.
    InFlight,
    /// Breaker open; adapter not called.
    CircuitOpen,
    /// Adapter failed; last-known-good result reused.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListOutcome {
    pub events: Vec<Event>,
    pub source: ListSource,
    /// The remote query returned `query_limit` rows; the list may be cut off.
    pub has_more: bool,
}

/// Degraded-mode signal for the UI layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub degraded: bool,
    pub owner_id: Option<String>,
    pub consecutive_empty: u32,
}

/// Counts from one [`EventStore::replay_pending`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    pub duplicates: usize,
    /// Still failing; kept in the queue.
    pub retained: usize,
    /// Permanently invalid (bad payload, unknown target); removed.
    pub dropped: usize,
}

/// How a write entered the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOrigin {
    Caller,
    Replay,
}

impl WriteOrigin {
    fn queues_on_failure(self) -> bool {
        self == Self::Caller
    }

    fn cooldown(self) -> bool {
        self == Self::Caller
    }
}

pub struct EventStore {
    repo: Arc<dyn EventRepository>,
    pending: Arc<dyn PendingWriteStore>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    normalizer: Normalizer,
    cache: Mutex<EventCache>,
    notifier: Notifier,
    guard: InFlightGuard,
    breaker: EmptyResultBreaker,
    health: watch::Sender<StoreHealth>,
    /// One replay pass at a time.
    replaying: AsyncMutex<()>,
}

impl EventStore {
    pub fn new(
        repo: Arc<dyn EventRepository>,
        pending: Arc<dyn PendingWriteStore>,
        config: StoreConfig,
    ) -> Self {
        Self::with_clock(repo, pending, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repo: Arc<dyn EventRepository>,
        pending: Arc<dyn PendingWriteStore>,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (health, _) = watch::channel(StoreHealth::default());
        Self {
            normalizer: Normalizer::new(clock.clone()),
            notifier: Notifier::new(clock.clone(), &config),
            guard: InFlightGuard::new(clock.clone(), config.guard_release(), config.guard_lease()),
            breaker: EmptyResultBreaker::new(
                config.empty_result_threshold,
                config.breaker_base_backoff(),
                config.breaker_max_backoff(),
            ),
            cache: Mutex::new(EventCache::new()),
            repo,
            pending,
            clock,
            config,
            health,
            replaying: AsyncMutex::new(()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Normalizes and inserts one event unless its signature already exists
    /// in the owner's (or family's) scope.
    pub async fn add(
        &self,
        raw: &RawEvent,
        owner_id: &str,
        family_id: Option<&str>,
    ) -> StoreResult<AddOutcome> {
        self.add_with(raw, owner_id, family_id, WriteOrigin::Caller)
            .await
    }

    /// Merges `patch` onto the stored document and writes the re-normalized
    /// record back.
    pub async fn update(&self, id: &str, patch: &EventPatch, owner_id: &str) -> StoreResult<Event> {
        self.update_with(id, patch, owner_id, WriteOrigin::Caller)
            .await
    }

    pub async fn delete(&self, id: &str, owner_id: &str) -> StoreResult<Event> {
        let id = require("id", id)?;
        let remote_id = self.remote_id(id);
        let key = format!("delete:{remote_id}");
        let _ticket = self.acquire(&key, true)?;

        let document = match self.repo.get_by_id(&remote_id).await {
            Ok(Some(document)) => document,
            Ok(None) => return Err(StoreError::NotFound(id.to_string())),
            Err(err) => return Err(self.write_failed("delete", id, err, None)),
        };

        match self.repo.remove(&document.id).await {
            Ok(()) => {}
            Err(RepoError::NotFound(_)) => return Err(StoreError::NotFound(id.to_string())),
            Err(err) => return Err(self.write_failed("delete", id, err, None)),
        }

        let removed = self.cache().delete(&document.id);
        let event = removed.unwrap_or_else(|| self.normalizer.normalize_document(&document));
        info!(
            "event=event_delete module=service status=ok event_id={} owner_id={owner_id}",
            document.id
        );
        self.notifier.notify(EventAction::Delete, &event);
        Ok(event)
    }

    /// Cache first, then the adapter. `Ok(None)` when the id is unknown.
    pub async fn get_by_id(&self, id: &str) -> StoreResult<Option<Event>> {
        let id = require("id", id)?;
        let cached = self.cache().get(id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        match self.repo.get_by_id(id).await {
            Ok(Some(document)) => {
                let event = self.normalizer.normalize_document(&document);
                self.cache().put(event.clone());
                Ok(Some(event))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                warn!("event=event_get module=service status=error event_id={id} error={err}");
                Err(StoreError::Persistence {
                    message: err.to_string(),
                    queued: false,
                })
            }
        }
    }

    /// Events in scope whose start falls inside `range`, sorted by start.
    ///
    /// Never fails on adapter errors; see [`ListSource`] for where the
    /// returned events came from.
    pub async fn list_for_owner(
        &self,
        owner_id: &str,
        range: DateRange,
        family_id: Option<&str>,
    ) -> StoreResult<ListOutcome> {
        let owner_id = require("ownerId", owner_id)?;
        let scope = OwnerScope::resolve(owner_id, family_id);
        let scope_key = scope.key();
        let now = self.clock.now();
        let range = self.effective_range(range, now);

        let throttled = self
            .cache()
            .last_query(&scope_key)
            .filter(|snapshot| now - snapshot.fetched_at < self.config.refresh_interval())
            .map(|snapshot| (snapshot.events.clone(), snapshot.has_more));
        if let Some((events, has_more)) = throttled {
            return Ok(within(events, &range, ListSource::Throttled, has_more));
        }

        let Some(_ticket) = self.guard.try_acquire(&format!("list:{scope_key}"), false) else {
            info!("event=event_list module=service status=skip reason=in_flight scope={scope_key}");
            return Ok(self.last_known_good(&scope_key, &range, ListSource::InFlight));
        };

        if let BreakerState::Open {
            until,
            consecutive_empty,
        } = self.breaker.check(owner_id, now)
        {
            warn!(
                "event=event_list module=service status=skip reason=circuit_open owner_id={owner_id} consecutive_empty={consecutive_empty} open_until={}",
                until.to_rfc3339()
            );
            self.raise_degraded(owner_id, consecutive_empty);
            return Ok(self.last_known_good(&scope_key, &range, ListSource::CircuitOpen));
        }

        match self.repo.query_by_owner(&scope, self.config.query_limit).await {
            Ok(documents) => {
                let has_more = documents.len() >= self.config.query_limit as usize;
                let mut events: Vec<Event> = documents
                    .iter()
                    .map(|document| self.normalizer.normalize_document(document))
                    .collect();
                events.sort_by_key(|event| event.start_at);
                {
                    let mut cache = self.cache();
                    for event in &events {
                        cache.put(event.clone());
                    }
                    cache.remember_query(&scope_key, events.clone(), now, has_more);
                }
                self.record_list_result(owner_id, events.is_empty(), now);
                if has_more {
                    warn!(
                        "event=event_list module=service status=truncated scope={scope_key} limit={}",
                        self.config.query_limit
                    );
                }
                info!(
                    "event=event_list module=service status=ok scope={scope_key} count={} has_more={has_more}",
                    events.len()
                );
                Ok(within(events, &range, ListSource::Remote, has_more))
            }
            Err(err) => {
                warn!(
                    "event=event_list module=service status=error scope={scope_key} error={err}"
                );
                self.record_list_result(owner_id, true, now);
                Ok(self.last_known_good(&scope_key, &range, ListSource::Unavailable))
            }
        }
    }

    /// Drops the throttled result for the scope and lists again.
    pub async fn refresh(&self, owner_id: &str, family_id: Option<&str>) -> StoreResult<ListOutcome> {
        let owner = require("ownerId", owner_id)?;
        let scope_key = OwnerScope::resolve(owner, family_id).key();
        self.cache().forget_query(&scope_key);
        self.list_for_owner(owner, DateRange::default(), family_id)
            .await
    }

    /// Forgets every cached event and throttled result.
    pub fn clear_cache(&self) {
        self.cache().clear();
        info!("event=cache_clear module=service status=ok");
    }

    pub fn cached_len(&self) -> usize {
        self.cache().len()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(EventAction, &Event) + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    /// Receiver for the ambient change broadcast.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeBroadcast> {
        self.notifier.bus().subscribe()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<StoreHealth> {
        self.health.subscribe()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn consecutive_empty_results(&self, owner_id: &str) -> u32 {
        self.breaker.consecutive_empty(owner_id.trim())
    }

    /// Writes waiting in the local fallback queue.
    pub fn pending_count(&self) -> StoreResult<usize> {
        Ok(self.pending.entries()?.len())
    }

    /// Replays queued writes in order; writes that still fail stay queued.
    ///
    /// Only the entries read at the start of the pass are removed, so writes
    /// queued by concurrent callers survive it.
    pub async fn replay_pending(&self) -> StoreResult<ReplayReport> {
        let _replaying = self.replaying.lock().await;
        let entries = self.pending.entries()?;
        let mut report = ReplayReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        let mut handled = Vec::with_capacity(entries.len());
        for QueuedWrite { seq, write } in entries {
            let outcome = match &write.op {
                PendingOp::Add => self
                    .add_with(
                        &RawEvent::from_record(&write.event),
                        &write.owner_id,
                        write.family_id.as_deref(),
                        WriteOrigin::Replay,
                    )
                    .await
                    .map(|outcome| outcome.is_duplicate),
                PendingOp::Update { target_id } => match EventPatch::from_record(&write.event) {
                    Some(patch) => self
                        .update_with(target_id, &patch, &write.owner_id, WriteOrigin::Replay)
                        .await
                        .map(|_| false),
                    None => Err(StoreError::Validation("unreadable queued patch".to_string())),
                },
            };

            match outcome {
                Ok(true) => report.duplicates += 1,
                Ok(false) => report.replayed += 1,
                Err(StoreError::Persistence { .. } | StoreError::RequestInProgress { .. }) => {
                    report.retained += 1;
                    continue;
                }
                Err(err) => {
                    warn!(
                        "event=pending_drop module=service status=skip seq={seq} owner_id={} code={}",
                        write.owner_id,
                        err.code()
                    );
                    report.dropped += 1;
                }
            }
            handled.push(seq);
        }

        self.pending.remove(&handled)?;
        info!(
            "event=pending_replay module=service status=ok replayed={} duplicates={} retained={} dropped={}",
            report.replayed, report.duplicates, report.retained, report.dropped
        );
        Ok(report)
    }

    async fn add_with(
        &self,
        raw: &RawEvent,
        owner_id: &str,
        family_id: Option<&str>,
        origin: WriteOrigin,
    ) -> StoreResult<AddOutcome> {
        let owner_id = require("ownerId", owner_id)?;
        let family_id = family_id.map(str::trim).filter(|value| !value.is_empty());

        let mut raw = raw.clone();
        raw.owner_id = Some(owner_id.to_string());
        if family_id.is_some() {
            raw.family_id = family_id.map(str::to_string);
        }
        let event = self.normalizer.normalize(&raw);
        let scope = OwnerScope::resolve(owner_id, family_id);

        // Add keys carry no cooldown: a retried submission must reach the
        // duplicate check and come back as a duplicate, not as a rejection.
        let key = format!("add:{}:{}", scope.key(), event.signature);
        let _ticket = self.acquire(&key, false)?;

        if let Some(existing) = self.find_duplicate(&event.signature, &scope).await {
            info!(
                "event=event_add module=service status=duplicate event_id={} signature={}",
                existing.identity_key(),
                event.signature
            );
            return Ok(AddOutcome {
                event: existing,
                is_duplicate: true,
            });
        }

        match self.repo.insert(event.to_record()).await {
            Ok(store_id) => {
                let mut persisted = event;
                persisted.store_id = Some(store_id);
                self.cache().put(persisted.clone());
                info!(
                    "event=event_add module=service status=ok event_id={} signature={}",
                    persisted.identity_key(),
                    persisted.signature
                );
                self.notifier.notify(EventAction::Add, &persisted);
                Ok(AddOutcome {
                    event: persisted,
                    is_duplicate: false,
                })
            }
            Err(err) => {
                let queued = origin.queues_on_failure().then(|| PendingWrite {
                    op: PendingOp::Add,
                    event: raw.to_record(),
                    timestamp: self.clock.now().timestamp_millis(),
                    owner_id: owner_id.to_string(),
                    family_id: family_id.map(str::to_string),
                });
                Err(self.write_failed("add", &event.universal_id, err, queued))
            }
        }
    }

    async fn update_with(
        &self,
        id: &str,
        patch: &EventPatch,
        owner_id: &str,
        origin: WriteOrigin,
    ) -> StoreResult<Event> {
        let id = require("id", id)?;
        let remote_id = self.remote_id(id);
        let key = format!("update:{remote_id}");
        let _ticket = self.acquire(&key, origin.cooldown())?;

        let queued = |timestamp: DateTime<Utc>| {
            origin.queues_on_failure().then(|| PendingWrite {
                op: PendingOp::Update {
                    target_id: remote_id.clone(),
                },
                event: patch.to_record(),
                timestamp: timestamp.timestamp_millis(),
                owner_id: owner_id.trim().to_string(),
                family_id: None,
            })
        };

        let document = match self.repo.get_by_id(&remote_id).await {
            Ok(Some(document)) => document,
            Ok(None) => return Err(StoreError::NotFound(id.to_string())),
            Err(err) => return Err(self.write_failed("update", id, err, queued(self.clock.now()))),
        };

        let updated = self.merge_patch(&document, patch, owner_id);
        if let Err(err) = self.repo.merge(&document.id, updated.to_record()).await {
            return Err(self.write_failed("update", id, err, queued(self.clock.now())));
        }

        self.cache().put(updated.clone());
        info!(
            "event=event_update module=service status=ok event_id={}",
            document.id
        );
        self.notifier.notify(EventAction::Update, &updated);
        Ok(updated)
    }

    /// Stored document + patch, re-normalized. `updated_at` never moves back.
    fn merge_patch(&self, document: &Document, patch: &EventPatch, owner_id: &str) -> Event {
        let previous = self.normalizer.normalize_document(document);

        let mut merged: RawRecord = document.data.clone();
        merged.remove("normalized");
        merged.remove("signature");
        merged.extend(patch.to_record());
        merged.insert("storeId".to_string(), Value::String(document.id.clone()));
        let owner_id = owner_id.trim();
        if !owner_id.is_empty() && !merged.contains_key("ownerId") {
            merged.insert("ownerId".to_string(), Value::String(owner_id.to_string()));
        }

        let mut updated = self.normalizer.normalize(&RawEvent::from_record(&merged));
        updated.store_id = Some(document.id.clone());
        updated.created_at = previous.created_at;
        updated.updated_at = self
            .clock
            .now()
            .max(previous.updated_at)
            .max(updated.created_at);
        updated
    }

    /// Existing document with `signature` in `scope`, remote first; the
    /// cache signature index answers when the adapter is unreachable.
    async fn find_duplicate(&self, signature: &str, scope: &OwnerScope) -> Option<Event> {
        match self.repo.query_by_signature(signature, scope).await {
            Ok(Some(document)) => {
                let existing = self.normalizer.normalize_document(&document);
                self.cache().put(existing.clone());
                Some(existing)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(
                    "event=duplicate_check module=service status=error signature={signature} error={err}"
                );
                self.cached_duplicate(signature, scope)
            }
        }
    }

    fn cached_duplicate(&self, signature: &str, scope: &OwnerScope) -> Option<Event> {
        self.cache().find_by_signature(scope, signature).cloned()
    }

    fn acquire(&self, key: &str, cooldown: bool) -> StoreResult<InFlightTicket<'_>> {
        self.guard.try_acquire(key, cooldown).ok_or_else(|| {
            info!("event=request_rejected module=service status=skip key={key}");
            StoreError::RequestInProgress {
                key: key.to_string(),
            }
        })
    }

    /// Remote document id for any identity the cache knows; `id` otherwise.
    fn remote_id(&self, id: &str) -> String {
        self.cache()
            .get(id)
            .and_then(|event| event.store_id.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn write_failed(
        &self,
        operation: &str,
        id: &str,
        err: RepoError,
        pending: Option<PendingWrite>,
    ) -> StoreError {
        let queued = match pending {
            Some(write) => match self.pending.append(&write) {
                Ok(()) => true,
                Err(queue_err) => {
                    error!(
                        "event=pending_append module=service status=error operation={operation} event_id={id} error={queue_err}"
                    );
                    false
                }
            },
            None => false,
        };
        error!(
            "event=event_{operation} module=service status=error event_id={id} queued={queued} error={err}"
        );
        StoreError::Persistence {
            message: err.to_string(),
            queued,
        }
    }

    fn record_list_result(&self, owner_id: &str, empty: bool, now: DateTime<Utc>) {
        if self.breaker.record(owner_id, empty, now).is_some() {
            self.raise_degraded(owner_id, self.breaker.consecutive_empty(owner_id));
            return;
        }
        if !empty {
            self.health.send_if_modified(|health| {
                if health.degraded && health.owner_id.as_deref() == Some(owner_id) {
                    *health = StoreHealth::default();
                    return true;
                }
                false
            });
        }
    }

    fn raise_degraded(&self, owner_id: &str, consecutive_empty: u32) {
        self.health.send_replace(StoreHealth {
            degraded: true,
            owner_id: Some(owner_id.to_string()),
            consecutive_empty,
        });
    }

    fn last_known_good(&self, scope_key: &str, range: &DateRange, source: ListSource) -> ListOutcome {
        let (events, has_more) = self
            .cache()
            .last_query(scope_key)
            .map(|snapshot| (snapshot.events.clone(), snapshot.has_more))
            .unwrap_or_default();
        within(events, range, source, has_more)
    }

    fn effective_range(&self, range: DateRange, now: DateTime<Utc>) -> DateRange {
        let lookback = Duration::try_days(self.config.default_lookback_days);
        let lookahead = Duration::try_days(self.config.default_lookahead_days);
        DateRange {
            start: range
                .start
                .or_else(|| lookback.and_then(|window| now.checked_sub_signed(window))),
            end: range
                .end
                .or_else(|| lookahead.and_then(|window| now.checked_add_signed(window))),
        }
    }

    fn cache(&self) -> MutexGuard<'_, EventCache> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn require<'a>(field: &str, value: &'a str) -> StoreResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn within(events: Vec<Event>, range: &DateRange, source: ListSource, has_more: bool) -> ListOutcome {
    ListOutcome {
        events: events
            .into_iter()
            .filter(|event| range.contains(event.start_at))
            .collect(),
        source,
        has_more,
    }
}
