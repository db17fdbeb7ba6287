//! Triple-key event cache.
//!
//! # Responsibility
//! - Hold the latest normalized state of every event seen this session.
//! - Resolve `id`, `store_id` and `universal_id` to the same entry.
//! - Index entries by `(scope, signature)` for local duplicate checks.
//! - Keep the last-known-good list per query scope for read throttling.
//!
//! # Invariants
//! - One live entry per event; a `put` evicts any other entry that answers
//!   to one of the new event's identities.
//! - `clear()` also drops every query snapshot, so the next read goes remote.

use crate::model::event::{Event, OwnerScope};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Last successful list result for one query scope.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
    pub events: Vec<Event>,
    pub fetched_at: DateTime<Utc>,
    /// The remote query hit its row limit; more events may exist.
    pub has_more: bool,
}

#[derive(Debug, Default)]
pub struct EventCache {
    /// Keyed by `universal_id`.
    entries: HashMap<String, Event>,
    /// `id` / `store_id` → `universal_id`.
    aliases: HashMap<String, String>,
    /// `(scope key, signature)` → `universal_id`.
    signatures: HashMap<(String, String), String>,
    snapshots: HashMap<String, QuerySnapshot>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces an event and refreshes the affected snapshot.
    pub fn put(&mut self, event: Event) {
        self.upsert_entry(event.clone());
        self.patch_snapshots(&event);
    }

    /// Looks up by any of the three identities.
    pub fn get(&self, key: &str) -> Option<&Event> {
        let universal_id = self.resolve(key)?;
        self.entries.get(universal_id)
    }

    /// Removes the entry answering to `key` from the map, the indexes and
    /// every snapshot.
    pub fn delete(&mut self, key: &str) -> Option<Event> {
        let universal_id = self.resolve(key)?.to_string();
        let removed = self.remove_entry(&universal_id)?;
        for snapshot in self.snapshots.values_mut() {
            snapshot
                .events
                .retain(|event| event.universal_id != removed.universal_id);
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.aliases.clear();
        self.signatures.clear();
        self.snapshots.clear();
    }

    /// First-seen event with `signature` in `scope`, if cached.
    pub fn find_by_signature(&self, scope: &OwnerScope, signature: &str) -> Option<&Event> {
        let universal_id = self
            .signatures
            .get(&(scope.key(), signature.to_string()))?;
        self.entries.get(universal_id)
    }

    pub fn remember_query(
        &mut self,
        scope_key: &str,
        events: Vec<Event>,
        at: DateTime<Utc>,
        has_more: bool,
    ) {
        self.snapshots.insert(
            scope_key.to_string(),
            QuerySnapshot {
                events,
                fetched_at: at,
                has_more,
            },
        );
    }

    pub fn last_query(&self, scope_key: &str) -> Option<&QuerySnapshot> {
        self.snapshots.get(scope_key)
    }

    pub fn forget_query(&mut self, scope_key: &str) -> Option<QuerySnapshot> {
        self.snapshots.remove(scope_key)
    }

    fn resolve(&self, key: &str) -> Option<&str> {
        if self.entries.contains_key(key) {
            return self.entries.get_key_value(key).map(|(k, _)| k.as_str());
        }
        self.aliases.get(key).map(String::as_str)
    }

    fn upsert_entry(&mut self, event: Event) {
        let stale: Vec<String> = event
            .identity_keys()
            .into_iter()
            .filter_map(|key| self.resolve(key))
            .filter(|universal_id| *universal_id != event.universal_id)
            .map(str::to_string)
            .collect();
        for universal_id in stale {
            self.remove_entry(&universal_id);
        }
        self.remove_entry(&event.universal_id);

        for key in event.identity_keys() {
            if key != event.universal_id {
                self.aliases
                    .insert(key.to_string(), event.universal_id.clone());
            }
        }
        if let Some(scope) = OwnerScope::of_event(&event) {
            self.signatures
                .entry((scope.key(), event.signature.clone()))
                .or_insert_with(|| event.universal_id.clone());
        }
        self.entries.insert(event.universal_id.clone(), event);
    }

    fn remove_entry(&mut self, universal_id: &str) -> Option<Event> {
        let removed = self.entries.remove(universal_id)?;
        for key in removed.identity_keys() {
            if self.aliases.get(key).map(String::as_str) == Some(universal_id) {
                self.aliases.remove(key);
            }
        }
        if let Some(scope) = OwnerScope::of_event(&removed) {
            let index_key = (scope.key(), removed.signature.clone());
            if self.signatures.get(&index_key).map(String::as_str) == Some(universal_id) {
                self.signatures.remove(&index_key);
            }
        }
        Some(removed)
    }

    fn patch_snapshots(&mut self, event: &Event) {
        let scope_key = OwnerScope::of_event(event).map(|scope| scope.key());
        for (key, snapshot) in self.snapshots.iter_mut() {
            let position = snapshot
                .events
                .iter()
                .position(|cached| cached.universal_id == event.universal_id);
            match position {
                Some(index) => snapshot.events[index] = event.clone(),
                None if scope_key.as_deref() == Some(key.as_str()) => {
                    snapshot.events.push(event.clone());
                }
                None => continue,
            }
            snapshot.events.sort_by_key(|cached| cached.start_at);
        }
    }
}
