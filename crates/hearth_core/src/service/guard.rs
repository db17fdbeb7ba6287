//! Cooperative request guards.
//!
//! # Responsibility
//! - [`InFlightGuard`]: one outstanding request per logical key.
//! - [`EmptyResultBreaker`]: stop querying an owner after repeated empty
//!   results, backing off exponentially.
//!
//! # Invariants
//! - Keys are independent; holding `update:a` never blocks `update:b`.
//! - A held key is freed after `lease` even if its ticket is leaked.
//! - A cooled-down key stays blocked for `release_delay` after release.
//! - Both tables are only touched inside short critical sections.

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const MAX_BACKOFF_DOUBLINGS: u32 = 16;

#[derive(Debug, Clone, Copy)]
struct GuardEntry {
    acquired_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
}

impl GuardEntry {
    fn blocks(&self, now: DateTime<Utc>, release_delay: Duration, lease: Duration) -> bool {
        match self.released_at {
            Some(released_at) => now - released_at < release_delay,
            None => now - self.acquired_at < lease,
        }
    }
}

pub struct InFlightGuard {
    clock: Arc<dyn Clock>,
    release_delay: Duration,
    lease: Duration,
    entries: Mutex<HashMap<String, GuardEntry>>,
}

impl InFlightGuard {
    pub fn new(clock: Arc<dyn Clock>, release_delay: Duration, lease: Duration) -> Self {
        Self {
            clock,
            release_delay,
            lease,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Claims `key`, or `None` while another holder (or its cooldown) is
    /// active.
    ///
    /// With `cooldown`, the key stays blocked for `release_delay` after the
    /// ticket drops; without it the key frees immediately.
    pub fn try_acquire(&self, key: &str, cooldown: bool) -> Option<InFlightTicket<'_>> {
        let now = self.clock.now();
        let mut entries = lock(&self.entries);
        entries.retain(|_, entry| entry.blocks(now, self.release_delay, self.lease));
        if entries.contains_key(key) {
            return None;
        }
        entries.insert(
            key.to_string(),
            GuardEntry {
                acquired_at: now,
                released_at: None,
            },
        );
        Some(InFlightTicket {
            guard: self,
            key: key.to_string(),
            cooldown,
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        let now = self.clock.now();
        lock(&self.entries)
            .get(key)
            .is_some_and(|entry| entry.blocks(now, self.release_delay, self.lease))
    }

    fn release(&self, key: &str, cooldown: bool) {
        let now = self.clock.now();
        let mut entries = lock(&self.entries);
        if cooldown {
            if let Some(entry) = entries.get_mut(key) {
                entry.released_at = Some(now);
            }
        } else {
            entries.remove(key);
        }
    }
}

/// Held key; released on drop.
pub struct InFlightTicket<'a> {
    guard: &'a InFlightGuard,
    key: String,
    cooldown: bool,
}

impl InFlightTicket<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightTicket<'_> {
    fn drop(&mut self) {
        self.guard.release(&self.key, self.cooldown);
    }
}

/// Result of [`EmptyResultBreaker::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Query normally; after an open window this call is the probe.
    Closed,
    Open {
        until: DateTime<Utc>,
        consecutive_empty: u32,
    },
}

#[derive(Debug, Default, Clone, Copy)]
struct OwnerRecord {
    consecutive_empty: u32,
    open_until: Option<DateTime<Utc>>,
}

/// Per-owner empty-result circuit breaker.
pub struct EmptyResultBreaker {
    threshold: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    owners: Mutex<HashMap<String, OwnerRecord>>,
}

impl EmptyResultBreaker {
    pub fn new(threshold: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            base_backoff,
            max_backoff,
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, owner: &str, now: DateTime<Utc>) -> BreakerState {
        match lock(&self.owners).get(owner) {
            Some(OwnerRecord {
                consecutive_empty,
                open_until: Some(until),
            }) if now < *until => BreakerState::Open {
                until: *until,
                consecutive_empty: *consecutive_empty,
            },
            _ => BreakerState::Closed,
        }
    }

    /// Records one list outcome; returns the new open deadline when this
    /// result (re)opened the breaker.
    pub fn record(&self, owner: &str, empty: bool, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut owners = lock(&self.owners);
        if !empty {
            if owners.remove(owner).is_some() {
                debug!("event=breaker_reset module=service status=ok owner_id={owner}");
            }
            return None;
        }

        let record = owners.entry(owner.to_string()).or_default();
        record.consecutive_empty = record.consecutive_empty.saturating_add(1);
        if record.consecutive_empty < self.threshold {
            return None;
        }
        let until = now
            .checked_add_signed(self.backoff(record.consecutive_empty - self.threshold))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        record.open_until = Some(until);
        Some(until)
    }

    pub fn consecutive_empty(&self, owner: &str) -> u32 {
        lock(&self.owners)
            .get(owner)
            .map_or(0, |record| record.consecutive_empty)
    }

    fn backoff(&self, doublings: u32) -> Duration {
        let factor = 1i32 << doublings.min(MAX_BACKOFF_DOUBLINGS);
        self.base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |window| window.min(self.max_backoff))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
