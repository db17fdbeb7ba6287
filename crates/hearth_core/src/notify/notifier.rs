//! Change fanout to in-process listeners and the broadcast bus.
//!
//! # Responsibility
//! - Deliver `add`/`update`/`delete` to every registered listener.
//! - Publish a minimal [`ChangeBroadcast`] for out-of-tree consumers.
//! - Collapse repeated notifications per `(identity, action)`.
//!
//! # Invariants
//! - A panicking listener never prevents delivery to the others.
//! - The debounce table never holds more than `history_limit` keys.
//! - No lock is held while listeners run.

use super::bus::{ChangeBroadcast, ChangeBus};
use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::model::event::{Event, EventAction};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Subscriber callback.
pub type Listener = Arc<dyn Fn(EventAction, &Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Handle returned by [`Notifier::subscribe`]; dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keeps the listener registered for the notifier's lifetime.
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry)
                .listeners
                .retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct Notifier {
    clock: Arc<dyn Clock>,
    debounce: Duration,
    history_limit: usize,
    source_tag: String,
    registry: Arc<Mutex<Registry>>,
    history: Mutex<HashMap<String, DateTime<Utc>>>,
    bus: ChangeBus,
}

impl Notifier {
    pub fn new(clock: Arc<dyn Clock>, config: &StoreConfig) -> Self {
        Self {
            clock,
            debounce: config.notify_debounce(),
            history_limit: config.notify_history_limit.max(1),
            source_tag: config.source_tag.clone(),
            registry: Arc::new(Mutex::new(Registry::default())),
            history: Mutex::new(HashMap::new()),
            bus: ChangeBus::new(config.broadcast_capacity),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(EventAction, &Event) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.push((id, Arc::new(listener)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    /// Number of `(identity, action)` keys currently remembered.
    pub fn history_len(&self) -> usize {
        lock(&self.history).len()
    }

    /// Fans out one change. Returns `false` when it was debounced.
    pub fn notify(&self, action: EventAction, event: &Event) -> bool {
        let key = format!("{}-{}", event.identity_key(), action);
        let now = self.clock.now();
        if !self.admit(&key, now) {
            debug!(
                "event=notify_debounced module=notify status=skip action={action} event_id={}",
                event.identity_key()
            );
            return false;
        }

        let listeners: Vec<(u64, Listener)> = lock(&self.registry).listeners.clone();
        let mut failed = 0usize;
        for (id, listener) in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(action, event))).is_err() {
                failed += 1;
                warn!(
                    "event=listener_failed module=notify status=error listener_id={id} action={action}"
                );
            }
        }

        let received = self.bus.publish(ChangeBroadcast::for_event(
            &self.source_tag,
            action,
            event,
            now.timestamp_millis(),
        ));
        debug!(
            "event=notify module=notify status=ok action={action} event_id={} listeners={} failed={failed} broadcast_receivers={received}",
            event.identity_key(),
            listeners.len()
        );
        true
    }

    fn admit(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut history = lock(&self.history);
        if let Some(last) = history.get(key) {
            if now - *last < self.debounce {
                return false;
            }
        }
        history.insert(key.to_string(), now);
        if history.len() > self.history_limit {
            prune(&mut history, self.history_limit);
        }
        true
    }
}

/// Keeps the `limit` most recent entries.
fn prune(history: &mut HashMap<String, DateTime<Utc>>, limit: usize) {
    let mut entries: Vec<(String, DateTime<Utc>)> = history.drain().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(limit);
    history.extend(entries);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
