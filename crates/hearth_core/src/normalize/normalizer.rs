//! Raw record → canonical `Event` conversion.
//!
//! # Responsibility
//! - Default every field, parse every time shape, compute the signature.
//! - Recognise already-normalized records and return them unchanged.
//!
//! # Invariants
//! - Never fails; unparsable start falls back to now, unparsable end to
//!   start + 1h.
//! - Idempotent: a normalized record normalizes to itself.
//! - Non-reentrant per identity: a nested record carrying an identity that is
//!   already being normalized higher up the same call becomes a shallow
//!   passthrough (no further nesting).
//! - Input is never mutated.

use super::signature::event_signature;
use crate::clock::Clock;
use crate::model::event::{Document, Event, RawRecord};
use crate::model::raw::{RawEvent, RawTime};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::warn;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "Untitled Event";
pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_SOURCE: &str = "manual";
pub const DEFAULT_STATUS: &str = "active";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Converts raw event input into canonical events.
#[derive(Clone)]
pub struct Normalizer {
    clock: Arc<dyn Clock>,
}

impl Normalizer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Normalizes one raw event (and its nested related records).
    pub fn normalize(&self, raw: &RawEvent) -> Event {
        let mut in_progress = Vec::new();
        self.normalize_guarded(raw, &mut in_progress)
    }

    /// Normalizes an untyped bag.
    ///
    /// Bags already carrying the normalized marker are returned as-is.
    pub fn normalize_record(&self, record: &RawRecord) -> Event {
        if let Some(event) = Event::from_normalized_record(record) {
            return event;
        }
        self.normalize(&RawEvent::from_record(record))
    }

    /// Normalizes a stored document, binding `store_id` to the document id.
    pub fn normalize_document(&self, document: &Document) -> Event {
        if let Some(mut event) = Event::from_normalized_record(&document.data) {
            if event.store_id.is_none() {
                event.store_id = Some(document.id.clone());
            }
            return event;
        }
        let mut raw = RawEvent::from_record(&document.data);
        raw.store_id = Some(document.id.clone());
        self.normalize(&raw)
    }

    fn normalize_guarded(&self, raw: &RawEvent, in_progress: &mut Vec<String>) -> Event {
        let identity = raw.identity().map(str::to_string);
        if let Some(identity) = identity.as_deref() {
            if in_progress.iter().any(|active| active == identity) {
                warn!(
                    "event=normalize_reentry module=normalize status=skip identity={identity}"
                );
                return self.build(raw, Vec::new());
            }
        }

        if let Some(identity) = identity.clone() {
            in_progress.push(identity);
        }
        let related = raw
            .related
            .iter()
            .map(|nested| self.normalize_guarded(nested, in_progress))
            .collect();
        if identity.is_some() {
            in_progress.pop();
        }

        self.build(raw, related)
    }

    fn build(&self, raw: &RawEvent, related: Vec<Event>) -> Event {
        let now = self.clock.now();

        let start_at = raw.start_at.as_ref().and_then(parse_time).unwrap_or(now);
        let end_at = raw
            .end_at
            .as_ref()
            .and_then(parse_time)
            .filter(|end| *end >= start_at)
            .unwrap_or_else(|| {
                // Near the top of the representable range there is no room
                // for the default hour.
                start_at
                    .checked_add_signed(Duration::hours(1))
                    .unwrap_or(start_at)
            });

        let universal_id = non_empty(&raw.universal_id)
            .or_else(|| non_empty(&raw.id))
            .map(str::to_string)
            .unwrap_or_else(|| format!("event-{}", Uuid::new_v4()));
        let id = non_empty(&raw.id)
            .or_else(|| non_empty(&raw.store_id))
            .map(str::to_string)
            .unwrap_or_else(|| universal_id.clone());

        let title = non_empty(&raw.title).unwrap_or(DEFAULT_TITLE).to_string();
        let category = non_empty(&raw.category)
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string();
        let discriminator = non_empty(&raw.child_ref)
            .or_else(|| non_empty(&raw.owner_id))
            .unwrap_or("");
        let signature = event_signature(&title, &start_at, discriminator, &category);

        let created_at = raw.created_at.as_ref().and_then(parse_time).unwrap_or(now);
        let updated_at = raw
            .updated_at
            .as_ref()
            .and_then(parse_time)
            .unwrap_or(now)
            .max(created_at);

        Event {
            id,
            store_id: non_empty(&raw.store_id).map(str::to_string),
            universal_id,
            signature,
            normalized: true,
            title,
            description: raw.description.clone().unwrap_or_default(),
            location: raw.location.clone().unwrap_or_default(),
            category,
            start_at,
            end_at,
            owner_id: non_empty(&raw.owner_id).map(str::to_string),
            family_id: non_empty(&raw.family_id).map(str::to_string),
            child_ref: non_empty(&raw.child_ref).map(str::to_string),
            attendees: raw.attendees.clone(),
            documents: raw.documents.clone(),
            providers: raw.providers.clone(),
            source: non_empty(&raw.source).unwrap_or(DEFAULT_SOURCE).to_string(),
            status: non_empty(&raw.status).unwrap_or(DEFAULT_STATUS).to_string(),
            created_at,
            updated_at,
            related,
        }
    }
}

/// Parses every accepted time shape; `None` when nothing matches.
pub fn parse_time(value: &RawTime) -> Option<DateTime<Utc>> {
    match value {
        RawTime::Instant(instant) => Some(*instant),
        RawTime::EpochMillis(millis) => Utc.timestamp_millis_opt(*millis).single(),
        RawTime::Text(text) => parse_time_text(text.trim()),
    }
}

fn parse_time_text(text: &str) -> Option<DateTime<Utc>> {
    if text.is_empty() {
        return None;
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if text.bytes().all(|byte| byte.is_ascii_digit()) {
        return text
            .parse::<i64>()
            .ok()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
    }
    None
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
