//! Serializable result envelopes for outer layers (CLI, bindings).
//!
//! # Invariants
//! - `success == false` always carries `error_code` and `error`.
//! - Envelopes hold identities and counts, plus the event itself where the
//!   caller asked for it.

use super::event_store::{AddOutcome, ListOutcome, ListSource, ReplayReport};
use crate::error::{StoreError, StoreResult};
use crate::model::event::Event;
use serde::Serialize;

/// Envelope for single-event operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub universal_id: Option<String>,
    pub is_duplicate: bool,
    /// The write failed but is durably queued for replay.
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    fn success(event: Event, is_duplicate: bool) -> Self {
        Self {
            success: true,
            event_id: Some(event.identity_key().to_string()),
            universal_id: Some(event.universal_id.clone()),
            is_duplicate,
            queued: false,
            event: Some(event),
            error_code: None,
            error: None,
        }
    }

    /// Success without an event, e.g. a lookup that found nothing.
    fn empty() -> Self {
        Self {
            success: true,
            event_id: None,
            universal_id: None,
            is_duplicate: false,
            queued: false,
            event: None,
            error_code: None,
            error: None,
        }
    }

    pub fn failure(err: &StoreError) -> Self {
        Self {
            success: false,
            event_id: None,
            universal_id: None,
            is_duplicate: false,
            queued: err.is_queued(),
            event: None,
            error_code: Some(err.code()),
            error: Some(err.to_string()),
        }
    }

    pub fn from_add(result: StoreResult<AddOutcome>) -> Self {
        match result {
            Ok(outcome) => Self::success(outcome.event, outcome.is_duplicate),
            Err(err) => Self::failure(&err),
        }
    }

    pub fn from_event(result: StoreResult<Event>) -> Self {
        match result {
            Ok(event) => Self::success(event, false),
            Err(err) => Self::failure(&err),
        }
    }

    pub fn from_lookup(result: StoreResult<Option<Event>>) -> Self {
        match result {
            Ok(Some(event)) => Self::success(event, false),
            Ok(None) => Self::empty(),
            Err(err) => Self::failure(&err),
        }
    }
}

/// Envelope for list reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub success: bool,
    pub events: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ListSource>,
    /// Set when the result is not fresh from the store.
    pub degraded: bool,
    /// The store returned a full page; older or later events may be missing.
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ListResponse {
    pub fn from_list(result: StoreResult<ListOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                degraded: matches!(
                    outcome.source,
                    ListSource::CircuitOpen | ListSource::Unavailable
                ),
                has_more: outcome.has_more,
                events: outcome.events,
                source: Some(outcome.source),
                error_code: None,
                error: None,
            },
            Err(err) => Self {
                success: false,
                events: Vec::new(),
                source: None,
                degraded: false,
                has_more: false,
                error_code: Some(err.code()),
                error: Some(err.to_string()),
            },
        }
    }
}

/// Envelope for a replay pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReplayReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplayResponse {
    pub fn from_replay(result: StoreResult<ReplayReport>) -> Self {
        match result {
            Ok(report) => Self {
                success: true,
                report: Some(report),
                error_code: None,
                error: None,
            },
            Err(err) => Self {
                success: false,
                report: None,
                error_code: Some(err.code()),
                error: Some(err.to_string()),
            },
        }
    }
}
