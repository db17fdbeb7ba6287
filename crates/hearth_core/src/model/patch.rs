//! Partial update payload.

use super::event::RawRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields to merge onto the last-known state of an event.
///
/// Unset fields are left untouched by the merge; this is never a blind
/// overwrite of the stored record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Any time shape the normalizer accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl EventPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Only the set fields, keyed by their canonical names.
    pub fn to_record(&self) -> RawRecord {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => RawRecord::new(),
        }
    }

    pub fn from_record(record: &RawRecord) -> Option<Self> {
        serde_json::from_value(Value::Object(record.clone())).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::EventPatch;

    #[test]
    fn record_contains_only_set_fields() {
        let patch = EventPatch::title("New title");
        let record = patch.to_record();
        assert_eq!(record.len(), 1);
        assert_eq!(record["title"], "New title");
        assert_eq!(EventPatch::from_record(&record), Some(patch));
    }

    #[test]
    fn default_patch_is_empty() {
        assert!(EventPatch::default().is_empty());
        assert!(!EventPatch::title("x").is_empty());
    }
}
