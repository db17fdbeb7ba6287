//! In-process broadcast channel for out-of-tree change consumers.

use crate::model::event::{Event, EventAction};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Minimal change message: identity and provenance only, never content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBroadcast {
    pub source: String,
    pub event_id: String,
    pub universal_id: String,
    pub action: EventAction,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl ChangeBroadcast {
    pub fn for_event(source: &str, action: EventAction, event: &Event, timestamp: i64) -> Self {
        Self {
            source: source.to_string(),
            event_id: event.identity_key().to_string(),
            universal_id: event.universal_id.clone(),
            action,
            timestamp,
        }
    }

    /// Whether this message was published under `tag`; receivers skip those
    /// to avoid refresh loops.
    pub fn is_from(&self, tag: &str) -> bool {
        self.source == tag
    }
}

#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeBroadcast>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBroadcast> {
        self.tx.subscribe()
    }

    /// Returns how many receivers got the message.
    pub fn publish(&self, message: ChangeBroadcast) -> usize {
        // No receivers is not an error here.
        self.tx.send(message).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
