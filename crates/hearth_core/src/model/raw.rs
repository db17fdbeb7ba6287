//! Loosely-shaped event input.
//!
//! # Responsibility
//! - Give raw records an explicit, all-optional shape before normalization.
//! - Map the known legacy field names through one fixed key table.
//!
//! # Invariants
//! - Reading a record never fails; wrongly-typed fields read as absent.
//! - Unknown keys are ignored.

use super::event::RawRecord;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

const ID_KEYS: &[&str] = &["id"];
const STORE_ID_KEYS: &[&str] = &["storeId"];
const UNIVERSAL_ID_KEYS: &[&str] = &["universalId"];
const TITLE_KEYS: &[&str] = &["title", "summary"];
const DESCRIPTION_KEYS: &[&str] = &["description"];
const LOCATION_KEYS: &[&str] = &["location"];
const CATEGORY_KEYS: &[&str] = &["category", "eventType"];
const START_KEYS: &[&str] = &["startAt", "startTime", "dateTime", "date"];
const END_KEYS: &[&str] = &["endAt", "endTime", "endDateTime"];
const OWNER_KEYS: &[&str] = &["ownerId", "userId"];
const FAMILY_KEYS: &[&str] = &["familyId"];
const CHILD_KEYS: &[&str] = &["childRef", "childId"];
const SOURCE_KEYS: &[&str] = &["source"];
const STATUS_KEYS: &[&str] = &["status"];
const CREATED_KEYS: &[&str] = &["createdAt"];
const UPDATED_KEYS: &[&str] = &["updatedAt"];

/// A time value as it arrived, before parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTime {
    Text(String),
    EpochMillis(i64),
    Instant(DateTime<Utc>),
}

impl From<&str> for RawTime {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RawTime {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for RawTime {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Instant(value)
    }
}

impl RawTime {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|float| float as i64))
                .map(Self::EpochMillis),
            // `{seconds, nanoseconds}` timestamp objects from document stores.
            Value::Object(map) => {
                let seconds = map.get("seconds").and_then(Value::as_i64)?;
                let nanos = map
                    .get("nanoseconds")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                seconds
                    .checked_mul(1_000)
                    .and_then(|millis| millis.checked_add(nanos / 1_000_000))
                    .map(Self::EpochMillis)
            }
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::EpochMillis(millis) => json!(millis),
            Self::Instant(instant) => json!(instant),
        }
    }
}

/// Raw event submission. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvent {
    pub id: Option<String>,
    pub store_id: Option<String>,
    pub universal_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub start_at: Option<RawTime>,
    pub end_at: Option<RawTime>,
    pub owner_id: Option<String>,
    pub family_id: Option<String>,
    pub child_ref: Option<String>,
    pub attendees: Vec<Value>,
    pub documents: Vec<Value>,
    pub providers: Vec<Value>,
    pub source: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<RawTime>,
    pub updated_at: Option<RawTime>,
    /// Embedded related records, e.g. from document extraction.
    pub related: Vec<RawEvent>,
}

impl RawEvent {
    pub fn titled(title: impl Into<String>, start_at: impl Into<RawTime>) -> Self {
        Self {
            title: Some(title.into()),
            start_at: Some(start_at.into()),
            ..Self::default()
        }
    }

    /// First identity that is present, in `id → storeId → universalId` order.
    pub fn identity(&self) -> Option<&str> {
        [&self.id, &self.store_id, &self.universal_id]
            .into_iter()
            .filter_map(|value| value.as_deref())
            .find(|value| !value.is_empty())
    }

    /// Reads a raw bag through the fixed key table.
    pub fn from_record(record: &RawRecord) -> Self {
        Self {
            id: text_field(record, ID_KEYS),
            store_id: text_field(record, STORE_ID_KEYS),
            universal_id: text_field(record, UNIVERSAL_ID_KEYS),
            title: text_field(record, TITLE_KEYS),
            description: text_field(record, DESCRIPTION_KEYS),
            location: text_field(record, LOCATION_KEYS),
            category: text_field(record, CATEGORY_KEYS),
            start_at: time_field(record, START_KEYS),
            end_at: time_field(record, END_KEYS),
            owner_id: text_field(record, OWNER_KEYS),
            family_id: text_field(record, FAMILY_KEYS),
            child_ref: text_field(record, CHILD_KEYS),
            attendees: list_field(record, "attendees"),
            documents: list_field(record, "documents"),
            providers: list_field(record, "providers"),
            source: text_field(record, SOURCE_KEYS),
            status: text_field(record, STATUS_KEYS),
            created_at: time_field(record, CREATED_KEYS),
            updated_at: time_field(record, UPDATED_KEYS),
            related: record
                .get("related")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_object)
                        .map(Self::from_record)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Writes the set fields back using the primary key names.
    pub fn to_record(&self) -> RawRecord {
        let mut record = RawRecord::new();
        put_text(&mut record, "id", &self.id);
        put_text(&mut record, "storeId", &self.store_id);
        put_text(&mut record, "universalId", &self.universal_id);
        put_text(&mut record, "title", &self.title);
        put_text(&mut record, "description", &self.description);
        put_text(&mut record, "location", &self.location);
        put_text(&mut record, "category", &self.category);
        put_time(&mut record, "startAt", &self.start_at);
        put_time(&mut record, "endAt", &self.end_at);
        put_text(&mut record, "ownerId", &self.owner_id);
        put_text(&mut record, "familyId", &self.family_id);
        put_text(&mut record, "childRef", &self.child_ref);
        put_list(&mut record, "attendees", &self.attendees);
        put_list(&mut record, "documents", &self.documents);
        put_list(&mut record, "providers", &self.providers);
        put_text(&mut record, "source", &self.source);
        put_text(&mut record, "status", &self.status);
        put_time(&mut record, "createdAt", &self.created_at);
        put_time(&mut record, "updatedAt", &self.updated_at);
        if !self.related.is_empty() {
            let related = self
                .related
                .iter()
                .map(|raw| Value::Object(raw.to_record()))
                .collect();
            record.insert("related".to_string(), Value::Array(related));
        }
        record
    }
}

fn text_field(record: &RawRecord, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find_map(|value| match value {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
}

fn time_field(record: &RawRecord, keys: &[&str]) -> Option<RawTime> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find_map(RawTime::from_value)
}

fn list_field(record: &RawRecord, key: &str) -> Vec<Value> {
    record
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn put_text(record: &mut RawRecord, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        record.insert(key.to_string(), Value::String(value.clone()));
    }
}

fn put_time(record: &mut RawRecord, key: &str, value: &Option<RawTime>) {
    if let Some(value) = value {
        record.insert(key.to_string(), value.to_value());
    }
}

fn put_list(record: &mut RawRecord, key: &str, values: &[Value]) {
    if !values.is_empty() {
        record.insert(key.to_string(), Value::Array(values.to_vec()));
    }
}
