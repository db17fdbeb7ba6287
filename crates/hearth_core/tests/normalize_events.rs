use chrono::{Duration, TimeZone, Utc};
use hearth_core::normalize::{event_signature, string_hash};
use hearth_core::{Clock, ManualClock, Normalizer, RawEvent, RawTime};
use serde_json::json;
use std::sync::Arc;

fn normalizer() -> (Normalizer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap(),
    ));
    (Normalizer::new(clock.clone()), clock)
}

fn record(value: serde_json::Value) -> hearth_core::RawRecord {
    value.as_object().cloned().unwrap()
}

#[test]
fn normalizing_a_normalized_record_returns_it_unchanged() {
    let (normalizer, clock) = normalizer();
    let mut raw = RawEvent::titled("Soccer practice", "2024-05-01T16:30");
    raw.owner_id = Some("user1".to_string());
    raw.attendees = vec![json!({"name": "Sam"})];
    raw.related
        .push(RawEvent::titled("Bring snacks", "2024-05-01T16:00"));
    let first = normalizer.normalize(&raw);

    clock.advance(Duration::hours(3));
    let again = normalizer.normalize_record(&first.to_record());

    assert_eq!(again, first);
}

#[test]
fn signature_ignores_fields_outside_its_inputs() {
    let (normalizer, _) = normalizer();
    let a = normalizer.normalize_record(&record(json!({
        "title": "Soccer practice",
        "startAt": "2024-05-01T16:30:05Z",
        "ownerId": "user1",
        "description": "first copy",
        "location": "Field 3",
    })));
    let b = normalizer.normalize_record(&record(json!({
        "title": "SOCCER PRACTICE",
        "startAt": "2024-05-01T16:30:59Z",
        "ownerId": "user1",
        "description": "second copy",
        "attendees": ["Sam"],
        "source": "import",
    })));

    assert_eq!(a.signature, b.signature);
    assert_ne!(a.universal_id, b.universal_id);
}

#[test]
fn signature_changes_with_minute_owner_or_category() {
    let (normalizer, _) = normalizer();
    let base = json!({"title": "Soccer", "startAt": "2024-05-01T16:30", "ownerId": "user1"});
    let signature = |patch: serde_json::Value| {
        let mut value = base.clone();
        value
            .as_object_mut()
            .unwrap()
            .extend(patch.as_object().cloned().unwrap());
        normalizer.normalize_record(&record(value)).signature
    };

    let original = signature(json!({}));
    assert_ne!(original, signature(json!({"startAt": "2024-05-01T16:31"})));
    assert_ne!(original, signature(json!({"ownerId": "user2"})));
    assert_ne!(original, signature(json!({"category": "sports"})));
}

#[test]
fn child_reference_wins_over_owner_as_discriminator() {
    let (normalizer, _) = normalizer();
    let from_user1 = normalizer.normalize_record(&record(json!({
        "title": "Swim", "startAt": "2024-05-02T10:00", "ownerId": "user1", "childRef": "kid1"
    })));
    let from_user2 = normalizer.normalize_record(&record(json!({
        "title": "Swim", "startAt": "2024-05-02T10:00", "userId": "user2", "childId": "kid1"
    })));

    assert_eq!(from_user1.signature, from_user2.signature);
}

#[test]
fn signature_matches_rolling_hash_of_base_string() {
    let (normalizer, _) = normalizer();
    let event = normalizer.normalize(&RawEvent::titled("Soccer practice", "2024-05-01T16:30"));

    let expected = format!(
        "sig-{}",
        string_hash("soccer practice-2024-05-01t16:30--general")
    );
    assert_eq!(event.signature, expected);
    assert_eq!(
        event.signature,
        event_signature("Soccer practice", &event.start_at, "", "general")
    );
}

#[test]
fn legacy_field_names_are_understood() {
    let (normalizer, _) = normalizer();
    let event = normalizer.normalize_record(&record(json!({
        "summary": "Dentist",
        "eventType": "medical",
        "userId": "user1",
        "startTime": {"seconds": 1_714_580_000, "nanoseconds": 0},
        "endTime": 1_714_583_600_000i64,
    })));

    assert_eq!(event.title, "Dentist");
    assert_eq!(event.category, "medical");
    assert_eq!(event.owner_id.as_deref(), Some("user1"));
    assert_eq!(event.start_at.timestamp(), 1_714_580_000);
    assert_eq!(event.end_at - event.start_at, Duration::hours(1));
}

#[test]
fn unparsable_dates_fall_back_to_now_and_plus_one_hour() {
    let (normalizer, clock) = normalizer();
    let mut raw = RawEvent::titled("Mystery", "sometime soon");
    raw.end_at = Some(RawTime::from("later"));

    let event = normalizer.normalize(&raw);

    assert_eq!(event.start_at, clock.now());
    assert_eq!(event.end_at, clock.now() + Duration::hours(1));
}

#[test]
fn nested_record_with_same_identity_becomes_shallow_passthrough() {
    let (normalizer, _) = normalizer();
    let mut inner = RawEvent::titled("Loop", "2024-05-01T10:00:00Z");
    inner.id = Some("evt-loop".to_string());
    inner
        .related
        .push(RawEvent::titled("Deeper", "2024-05-01T11:00:00Z"));
    let mut outer = inner.clone();
    outer.related = vec![inner];

    let event = normalizer.normalize(&outer);

    assert_eq!(event.related.len(), 1);
    let nested = &event.related[0];
    assert_eq!(nested.id, "evt-loop");
    assert!(nested.normalized);
    assert!(nested.related.is_empty());
}

#[test]
fn distinct_nested_records_are_normalized_recursively() {
    let (normalizer, _) = normalizer();
    let mut outer = RawEvent::titled("Recital", "2024-06-01T18:00:00Z");
    outer.id = Some("recital".to_string());
    let mut rehearsal = RawEvent::titled("Rehearsal", "2024-05-30T18:00:00Z");
    rehearsal.id = Some("rehearsal".to_string());
    rehearsal
        .related
        .push(RawEvent::titled("Costume fitting", "2024-05-29T18:00:00Z"));
    outer.related.push(rehearsal);

    let event = normalizer.normalize(&outer);

    assert_eq!(event.related[0].title, "Rehearsal");
    assert_eq!(event.related[0].related[0].title, "Costume fitting");
}

#[test]
fn identity_defaults_follow_precedence() {
    let (normalizer, _) = normalizer();

    let with_store_id = normalizer.normalize_record(&record(json!({"storeId": "doc-9"})));
    assert_eq!(with_store_id.id, "doc-9");
    assert!(with_store_id.universal_id.starts_with("event-"));

    let with_id = normalizer.normalize_record(&record(json!({"id": "evt1"})));
    assert_eq!(with_id.universal_id, "evt1");
    assert!(with_id.store_id.is_none());
}

#[test]
fn out_of_range_timestamp_objects_fall_back_to_now() {
    let (normalizer, clock) = normalizer();
    for start in [
        json!({"seconds": i64::MAX}),
        json!({"seconds": i64::MIN, "nanoseconds": 0}),
        json!({"seconds": i64::MAX / 1_000, "nanoseconds": i64::MAX}),
    ] {
        let event = normalizer.normalize_record(&record(json!({"title": "x", "startAt": start})));
        assert_eq!(event.start_at, clock.now());
        assert_eq!(event.end_at, clock.now() + Duration::hours(1));
    }
}

#[test]
fn out_of_range_epoch_numbers_fall_back_to_now() {
    let (normalizer, clock) = normalizer();
    for start in [
        json!(i64::MAX),
        json!(i64::MIN),
        json!("99999999999999999999"),
        json!(1e300),
    ] {
        let event = normalizer.normalize_record(&record(json!({"title": "x", "startAt": start})));
        assert_eq!(event.start_at, clock.now());
    }
}

#[test]
fn start_at_the_last_representable_instant_keeps_end_equal_to_start() {
    let (normalizer, _) = normalizer();
    let last = chrono::DateTime::<Utc>::MAX_UTC.timestamp_millis();

    let event = normalizer.normalize_record(&record(json!({"title": "x", "startAt": last})));

    assert_eq!(event.start_at.timestamp_millis(), last);
    assert_eq!(event.end_at, event.start_at);
    assert!(event.signature.starts_with("sig-"));
}
