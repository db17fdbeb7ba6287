mod common;

use chrono::{TimeZone, Utc};
use common::record;
use hearth_core::{
    open_db, open_db_in_memory, DateRange, EventPatch, EventRepository, EventStore, ListSource,
    ManualClock, OwnerScope, RawEvent, RepoError, SqliteEventRepository, SqlitePendingWriteStore,
    StoreConfig,
};
use serde_json::json;
use std::sync::Arc;

fn sqlite_store() -> (EventStore, Arc<SqliteEventRepository>, Arc<ManualClock>) {
    let repo = Arc::new(SqliteEventRepository::new(open_db_in_memory().unwrap()));
    let pending = Arc::new(SqlitePendingWriteStore::new(open_db_in_memory().unwrap()));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap(),
    ));
    let store = EventStore::with_clock(
        repo.clone(),
        pending,
        StoreConfig::default(),
        clock.clone(),
    );
    (store, repo, clock)
}

fn may() -> DateRange {
    DateRange::between(
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn store_lifecycle_on_sqlite() {
    let (store, repo, clock) = sqlite_store();

    let soccer = RawEvent::titled("Soccer practice", "2024-05-01T16:30");
    let first = store.add(&soccer, "user1", Some("fam1")).await.unwrap();
    assert!(!first.is_duplicate);
    let store_id = first.event.store_id.clone().unwrap();

    let again = store.add(&soccer, "user1", Some("fam1")).await.unwrap();
    assert!(again.is_duplicate);
    assert_eq!(again.event.store_id.as_deref(), Some(store_id.as_str()));

    store
        .add(
            &RawEvent::titled("Piano", "2024-05-03T15:00"),
            "user2",
            Some("fam1"),
        )
        .await
        .unwrap();

    let listed = store
        .list_for_owner("user1", may(), Some("fam1"))
        .await
        .unwrap();
    assert_eq!(listed.source, ListSource::Remote);
    let titles: Vec<_> = listed.events.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["Soccer practice", "Piano"]);

    let updated = store
        .update(&store_id, &EventPatch::title("Soccer match"), "user1")
        .await
        .unwrap();
    assert_eq!(updated.title, "Soccer match");
    let stored = repo.get_by_id(&store_id).await.unwrap().unwrap();
    assert_eq!(stored.data["title"], "Soccer match");
    assert_eq!(stored.data["signature"], updated.signature.as_str());

    clock.advance_ms(500);
    store.delete(&store_id, "user1").await.unwrap();
    assert!(repo.get_by_id(&store_id).await.unwrap().is_none());
    assert!(store.get_by_id(&store_id).await.unwrap().is_none());
}

#[tokio::test]
async fn signature_lookup_respects_scope() {
    let repo = SqliteEventRepository::new(open_db_in_memory().unwrap());
    let id = repo
        .insert(record(json!({
            "title": "Soccer",
            "signature": "sig-1",
            "ownerId": "user1",
            "familyId": "fam1",
        })))
        .await
        .unwrap();

    let in_family = repo
        .query_by_signature("sig-1", &OwnerScope::Family("fam1".to_string()))
        .await
        .unwrap();
    assert_eq!(in_family.map(|doc| doc.id), Some(id));

    assert!(repo
        .query_by_signature("sig-1", &OwnerScope::Family("fam2".to_string()))
        .await
        .unwrap()
        .is_none());
    assert!(repo
        .query_by_signature("sig-1", &OwnerScope::Owner("user1".to_string()))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn merge_rewrites_indexed_columns() {
    let repo = SqliteEventRepository::new(open_db_in_memory().unwrap());
    let id = repo
        .insert(record(json!({"title": "A", "ownerId": "user1", "signature": "sig-a"})))
        .await
        .unwrap();

    repo.merge(&id, record(json!({"signature": "sig-b", "familyId": "fam9"})))
        .await
        .unwrap();

    let family = OwnerScope::Family("fam9".to_string());
    assert!(repo.query_by_signature("sig-a", &family).await.unwrap().is_none());
    let doc = repo.query_by_signature("sig-b", &family).await.unwrap().unwrap();
    assert_eq!(doc.data["title"], "A");
    assert_eq!(repo.query_by_owner(&family, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_documents_report_not_found() {
    let repo = SqliteEventRepository::new(open_db_in_memory().unwrap());

    assert!(matches!(
        repo.merge("nope", record(json!({"title": "x"}))).await,
        Err(RepoError::NotFound(_))
    ));
    assert!(matches!(
        repo.remove("nope").await,
        Err(RepoError::NotFound(_))
    ));
}

#[tokio::test]
async fn documents_persist_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hearth.sqlite3");
    let id = {
        let repo = SqliteEventRepository::new(open_db(&path).unwrap());
        repo.insert(record(json!({"title": "Dentist", "ownerId": "user1"})))
            .await
            .unwrap()
    };

    let reopened = SqliteEventRepository::new(open_db(&path).unwrap());
    let doc = reopened.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(doc.data["title"], "Dentist");
}
