//! Canonical event model.
//!
//! # Responsibility
//! - Define the strict `Event` shape produced by the normalizer.
//! - Provide identity helpers shared by cache, coordinator and notifier.
//!
//! # Invariants
//! - `normalized` is always `true` for values of this type.
//! - `end_at >= start_at`.
//! - `updated_at >= created_at`.
//! - `store_id` is only ever a remote document id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

/// Untyped key/value bag exchanged with the persistence adapter.
pub type RawRecord = Map<String, Value>;

/// A stored document: remote id next to its bag of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: RawRecord,
}

impl Document {
    pub fn new(id: impl Into<String>, data: RawRecord) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Mutation kind fanned out to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Add,
    Update,
    Delete,
}

impl EventAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl Display for EventAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership scope used for queries and duplicate detection.
///
/// A family scope wins over an owner scope whenever a family id is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerScope {
    Family(String),
    Owner(String),
}

impl OwnerScope {
    pub fn resolve(owner_id: &str, family_id: Option<&str>) -> Self {
        match family_id.map(str::trim).filter(|value| !value.is_empty()) {
            Some(family) => Self::Family(family.to_string()),
            None => Self::Owner(owner_id.trim().to_string()),
        }
    }

    /// Scope of an already-normalized event, if it has any owner data.
    pub fn of_event(event: &Event) -> Option<Self> {
        match (&event.family_id, &event.owner_id) {
            (Some(family), _) if !family.is_empty() => Some(Self::Family(family.clone())),
            (_, Some(owner)) if !owner.is_empty() => Some(Self::Owner(owner.clone())),
            _ => None,
        }
    }

    /// Stable string form used as a map key.
    pub fn key(&self) -> String {
        match self {
            Self::Family(id) => format!("family:{id}"),
            Self::Owner(id) => format!("owner:{id}"),
        }
    }

    /// Whether a stored bag belongs to this scope.
    pub fn matches_record(&self, record: &RawRecord) -> bool {
        let field = match self {
            Self::Family(_) => "familyId",
            Self::Owner(_) => "ownerId",
        };
        let expected = match self {
            Self::Family(id) | Self::Owner(id) => id.as_str(),
        };
        record.get(field).and_then(Value::as_str) == Some(expected)
    }
}

/// Inclusive start-time window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| instant >= start)
            && self.end.map_or(true, |end| instant <= end)
    }
}

/// Canonical, fully-defaulted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub store_id: Option<String>,
    pub universal_id: String,
    /// Content hash used as the deduplication key (`sig-...`).
    pub signature: String,
    pub normalized: bool,
    pub title: String,
    pub description: String,
    pub location: String,
    pub category: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub owner_id: Option<String>,
    pub family_id: Option<String>,
    pub child_ref: Option<String>,
    pub attendees: Vec<Value>,
    pub documents: Vec<Value>,
    pub providers: Vec<Value>,
    pub source: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub related: Vec<Event>,
}

impl Event {
    /// Key used for notification bookkeeping: remote id first.
    pub fn identity_key(&self) -> &str {
        self.store_id
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or(self.id.as_str())
    }

    /// Whether `key` names this event by any of its three identities.
    pub fn answers_to(&self, key: &str) -> bool {
        self.id == key || self.universal_id == key || self.store_id.as_deref() == Some(key)
    }

    /// All non-empty identity keys, deduplicated.
    pub fn identity_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::with_capacity(3);
        for key in [
            Some(self.universal_id.as_str()),
            Some(self.id.as_str()),
            self.store_id.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Serializes into the bag shape written to the adapter.
    pub fn to_record(&self) -> RawRecord {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => RawRecord::new(),
        }
    }

    /// Reads back a bag previously written by [`Event::to_record`].
    ///
    /// Returns `None` for anything that is not marked normalized or does not
    /// match the canonical shape; such bags go through the normalizer.
    pub fn from_normalized_record(record: &RawRecord) -> Option<Self> {
        if record.get("normalized").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        serde_json::from_value::<Event>(Value::Object(record.clone()))
            .ok()
            .filter(|event| event.normalized)
    }
}
