use pretty_assertions::assert_eq;
use regie_model::{Fields, ListQuery, OrderBy, Predicate, Record};
use regie_storage::{MemoryStore, Snapshot, StoreAdapter, StoreError, SubscriptionTarget};
use regie_types::{RecordId, Timestamp};
use serde_json::{json, Value};

fn fields(value: Value) -> Fields {
    value.as_object().cloned().unwrap()
}

async fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    for (id, name, genre) in [("a1", "Nina", "jazz"), ("a2", "Otis", "soul"), ("a3", "Ella", "jazz")] {
        store
            .insert("artists", Record::new(id, fields(json!({"name": name, "genre": genre}))))
            .await;
    }
    store
}

// ── CRUD ─────────────────────────────────────────────────────────

#[tokio::test]
async fn create_assigns_id_and_lifts_stamps() {
    let store = MemoryStore::new();
    let id = store
        .create_document("venues", fields(json!({"name": "Olympia", "createdAt": 42})))
        .await
        .unwrap();
    let record = store.get_document("venues", &id).await.unwrap().unwrap();
    assert_eq!(record.get_str("name"), Some("Olympia"));
    assert_eq!(record.created_at, Some(Timestamp::from_millis(42)));
    assert_eq!(store.len("venues").await, 1);
}

#[tokio::test]
async fn get_missing_is_none() {
    let store = seeded().await;
    assert!(store.get_document("artists", &RecordId::from("zz")).await.unwrap().is_none());
    assert!(store.get_document("nope", &RecordId::from("a1")).await.unwrap().is_none());
}

#[tokio::test]
async fn update_merges_fields() {
    let store = seeded().await;
    let id = RecordId::from("a1");
    store
        .update_document("artists", &id, fields(json!({"genre": "blues", "updatedAt": 7})))
        .await
        .unwrap();
    let record = store.get_document("artists", &id).await.unwrap().unwrap();
    assert_eq!(record.get_str("name"), Some("Nina"));
    assert_eq!(record.get_str("genre"), Some("blues"));
    assert_eq!(record.updated_at, Some(Timestamp::from_millis(7)));
}

#[tokio::test]
async fn update_missing_is_not_found() {
    let store = seeded().await;
    let err = store
        .update_document("artists", &RecordId::from("zz"), Fields::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn delete_removes_document() {
    let store = seeded().await;
    store.delete_document("artists", &RecordId::from("a2")).await.unwrap();
    assert_eq!(store.len("artists").await, 2);
    let err = store.delete_document("artists", &RecordId::from("a2")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

// ── Queries ──────────────────────────────────────────────────────

#[tokio::test]
async fn list_filters_and_orders() {
    let store = seeded().await;
    let query = ListQuery::new()
        .filter(Predicate::eq("genre", json!("jazz")))
        .order_by(OrderBy::asc("name"));
    let names: Vec<String> = store
        .list_documents("artists", &query)
        .await
        .unwrap()
        .iter()
        .map(|r| r.get_str("name").unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Ella", "Nina"]);
}

#[tokio::test]
async fn count_ignores_paging() {
    let store = seeded().await;
    let query = ListQuery::new().limit(1).offset(1);
    assert_eq!(store.count_documents("artists", &query).await.unwrap(), 3);
    assert_eq!(store.list_documents("artists", &query).await.unwrap().len(), 1);
}

// ── Subscriptions ────────────────────────────────────────────────

#[tokio::test]
async fn subscription_pushes_initial_then_changes() {
    let store = seeded().await;
    let mut sub = store
        .subscribe(SubscriptionTarget::Collection {
            collection: "artists".into(),
            query: ListQuery::new().filter(Predicate::eq("genre", json!("jazz"))),
        })
        .await
        .unwrap();

    match sub.next_snapshot().await.unwrap() {
        Snapshot::Collection(records) => assert_eq!(records.len(), 2),
        other => panic!("Expected collection snapshot, got {other:?}"),
    }

    store
        .create_document("artists", fields(json!({"name": "Chet", "genre": "jazz"})))
        .await
        .unwrap();

    match sub.next_snapshot().await.unwrap() {
        Snapshot::Collection(records) => assert_eq!(records.len(), 3),
        other => panic!("Expected collection snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn document_subscription_sees_updates() {
    let store = seeded().await;
    let id = RecordId::from("a1");
    let mut sub = store
        .subscribe(SubscriptionTarget::Document {
            collection: "artists".into(),
            id: id.clone(),
        })
        .await
        .unwrap();
    assert!(matches!(sub.next_snapshot().await.unwrap(), Snapshot::Document(Some(_))));

    store.delete_document("artists", &id).await.unwrap();
    assert_eq!(sub.next_snapshot().await.unwrap(), Snapshot::Document(None));
}

#[tokio::test]
async fn changes_in_other_collections_are_ignored() {
    let store = seeded().await;
    let mut sub = store
        .subscribe(SubscriptionTarget::Collection {
            collection: "artists".into(),
            query: ListQuery::new(),
        })
        .await
        .unwrap();
    sub.next_snapshot().await.unwrap();

    store.create_document("venues", Fields::new()).await.unwrap();
    store.create_document("artists", Fields::new()).await.unwrap();

    match sub.next_snapshot().await.unwrap() {
        Snapshot::Collection(records) => assert_eq!(records.len(), 4),
        other => panic!("Expected collection snapshot, got {other:?}"),
    }
}
