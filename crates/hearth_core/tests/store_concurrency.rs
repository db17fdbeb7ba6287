mod common;

use common::{harness, Harness, GET_BY_ID, MERGE, REMOVE};
use hearth_core::{EventAction, EventPatch, PendingOp, PendingWriteStore, StoreError};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn seeded() -> Harness {
    let h = harness();
    h.repo.seed(
        "evt1",
        json!({
            "title": "Old title",
            "location": "Field 3",
            "startAt": "2024-05-01T16:30",
            "ownerId": "user1",
            "familyId": "fam1",
            "createdAt": "2024-03-01T08:00:00Z",
            "updatedAt": "2024-03-02T08:00:00Z",
        }),
    );
    h.repo.seed(
        "evt2",
        json!({"title": "Piano", "startAt": "2024-05-02T17:00", "ownerId": "user1"}),
    );
    h
}

#[tokio::test]
async fn overlapping_update_on_same_id_is_rejected() {
    let h = seeded();
    let gate = h.repo.hold(GET_BY_ID);
    let patch = EventPatch::title("New title");

    let (first, second) = tokio::join!(h.store.update("evt1", &patch, "user1"), async {
        let second = h.store.update("evt1", &patch, "user1").await;
        gate.notify_one();
        second
    });

    assert_eq!(first.unwrap().title, "New title");
    match second.unwrap_err() {
        StoreError::RequestInProgress { key } => assert_eq!(key, "update:evt1"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.repo.calls(MERGE), 1);
}

#[tokio::test]
async fn update_through_an_alias_is_serialized_with_the_remote_id() {
    let h = harness();
    h.repo.seed(
        "doc-1",
        json!({"universalId": "u-1", "title": "Old", "startAt": "2024-05-01T16:30", "ownerId": "user1"}),
    );
    h.store.get_by_id("doc-1").await.unwrap().unwrap();
    let gate = h.repo.hold(GET_BY_ID);

    let patch_a = EventPatch::title("A");
    let (first, second) = tokio::join!(
        h.store.update("doc-1", &patch_a, "user1"),
        async {
            let second = h.store.update("u-1", &EventPatch::title("B"), "user1").await;
            gate.notify_one();
            second
        }
    );

    assert_eq!(first.unwrap().title, "A");
    match second.unwrap_err() {
        StoreError::RequestInProgress { key } => assert_eq!(key, "update:doc-1"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.repo.calls(MERGE), 1);
}

#[tokio::test]
async fn delete_through_an_alias_waits_out_the_cooldown() {
    let h = harness();
    h.repo.seed(
        "doc-1",
        json!({"universalId": "u-1", "title": "Old", "startAt": "2024-05-01T16:30", "ownerId": "user1"}),
    );
    h.store.get_by_id("doc-1").await.unwrap().unwrap();
    h.repo.fail_next(REMOVE, 1);
    assert!(h.store.delete("doc-1", "user1").await.is_err());

    let early = h.store.delete("u-1", "user1").await;

    match early.unwrap_err() {
        StoreError::RequestInProgress { key } => assert_eq!(key, "delete:doc-1"),
        other => panic!("unexpected error: {other}"),
    }
    h.clock.advance_ms(500);
    assert!(h.store.delete("u-1", "user1").await.is_ok());
}

#[tokio::test]
async fn updates_on_different_ids_do_not_block_each_other() {
    let h = seeded();

    let patch_a = EventPatch::title("A");
    let patch_b = EventPatch::title("B");
    let (a, b) = tokio::join!(
        h.store.update("evt1", &patch_a, "user1"),
        h.store.update("evt2", &patch_b, "user1"),
    );

    assert_eq!(a.unwrap().title, "A");
    assert_eq!(b.unwrap().title, "B");
}

#[tokio::test]
async fn finished_update_keeps_key_blocked_for_release_delay() {
    let h = seeded();
    let patch = EventPatch::title("New title");

    h.store.update("evt1", &patch, "user1").await.unwrap();
    let early = h.store.update("evt1", &patch, "user1").await;
    assert!(matches!(early, Err(StoreError::RequestInProgress { .. })));

    h.clock.advance_ms(500);
    assert!(h.store.update("evt1", &patch, "user1").await.is_ok());
}

#[tokio::test]
async fn update_merges_onto_stored_state() {
    let h = seeded();

    let updated = h
        .store
        .update("evt1", &EventPatch::title("New title"), "user1")
        .await
        .unwrap();

    assert_eq!(updated.title, "New title");
    assert_eq!(updated.location, "Field 3");
    assert_eq!(updated.store_id.as_deref(), Some("evt1"));
    assert!(updated.updated_at >= updated.created_at);
    assert_eq!(updated.created_at.to_rfc3339(), "2024-03-01T08:00:00+00:00");

    let stored = h.repo.inner().documents();
    let doc = stored.iter().find(|doc| doc.id == "evt1").unwrap();
    assert_eq!(doc.data["title"], "New title");
    assert_eq!(doc.data["location"], "Field 3");
    assert_eq!(doc.data["normalized"], true);
    assert_eq!(doc.data["signature"], updated.signature.as_str());
}

#[tokio::test]
async fn title_change_moves_the_signature() {
    let h = seeded();
    let before = h.store.get_by_id("evt1").await.unwrap().unwrap();

    let after = h
        .store
        .update("evt1", &EventPatch::title("Soccer final"), "user1")
        .await
        .unwrap();

    assert_ne!(before.signature, after.signature);
}

#[tokio::test]
async fn update_of_unknown_id_is_not_found() {
    let h = seeded();

    let err = h
        .store
        .update("missing", &EventPatch::title("x"), "user1")
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::NotFound(id) if id == "missing"));
}

#[tokio::test]
async fn failed_merge_is_queued_as_update() {
    let h = seeded();
    h.repo.fail_next(MERGE, 1);

    let err = h
        .store
        .update("evt1", &EventPatch::title("New title"), "user1")
        .await
        .unwrap_err();

    assert!(err.is_queued());
    let queued = h.pending.load().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(
        queued[0].op,
        PendingOp::Update {
            target_id: "evt1".to_string()
        }
    );
    assert_eq!(queued[0].event["title"], "New title");
}

#[tokio::test]
async fn update_and_delete_notify_listeners() {
    let h = seeded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = h.store.subscribe(move |action, event| {
        sink.lock()
            .unwrap()
            .push((action, event.identity_key().to_string()));
    });

    h.store
        .update("evt1", &EventPatch::title("New title"), "user1")
        .await
        .unwrap();
    h.clock.advance_ms(500);
    h.store.delete("evt1", "user1").await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            (EventAction::Update, "evt1".to_string()),
            (EventAction::Delete, "evt1".to_string()),
        ]
    );
}

#[tokio::test]
async fn delete_removes_from_store_and_cache() {
    let h = seeded();
    let cached = h.store.get_by_id("evt1").await.unwrap().unwrap();

    let deleted = h.store.delete("evt1", "user1").await.unwrap();

    assert_eq!(deleted.universal_id, cached.universal_id);
    assert_eq!(h.repo.calls(REMOVE), 1);
    assert!(h.store.get_by_id("evt1").await.unwrap().is_none());
    assert!(h.store.get_by_id(&cached.universal_id).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_resolves_cached_universal_id_to_store_id() {
    let h = seeded();
    let cached = h.store.get_by_id("evt2").await.unwrap().unwrap();

    h.store.delete(&cached.universal_id, "user1").await.unwrap();

    assert!(h
        .repo
        .inner()
        .documents()
        .iter()
        .all(|doc| doc.id != "evt2"));
}

#[tokio::test]
async fn failed_delete_is_reported_and_entry_stays_cached() {
    let h = seeded();
    h.store.get_by_id("evt1").await.unwrap();
    h.repo.fail_next(REMOVE, 1);

    let err = h.store.delete("evt1", "user1").await.unwrap_err();

    assert!(matches!(
        err,
        StoreError::Persistence { queued: false, .. }
    ));
    assert!(h.store.get_by_id("evt1").await.unwrap().is_some());
}

#[tokio::test]
async fn delete_of_unknown_id_is_not_found() {
    let h = seeded();

    let err = h.store.delete("missing", "user1").await.unwrap_err();

    assert_eq!(err.code(), "not_found");
}
