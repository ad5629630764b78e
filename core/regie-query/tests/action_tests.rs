mod common;

use common::{fields, init_tracing, FaultyStore};
use pretty_assertions::assert_eq;
use regie_cache::{Cache, CacheConfig};
use regie_model::ListQuery;
use regie_query::{ActionExecutor, ActionOutcome, BatchOperation, QueryError};
use regie_storage::{MemoryStore, StoreAdapter};
use regie_types::{ManualClock, RecordId, Timestamp};
use serde_json::json;
use std::sync::{Arc, Mutex};

const T0: u64 = 1_700_000_000_000;

fn executor(store: &MemoryStore, clock: &ManualClock) -> ActionExecutor {
    ActionExecutor::new(Arc::new(store.clone()), "venues").with_clock(Arc::new(clock.clone()))
}

// ── Writes ───────────────────────────────────────────────────────

#[tokio::test]
async fn create_stamps_both_timestamps() {
    init_tracing();
    let store = MemoryStore::new();
    let clock = ManualClock::new(Timestamp::from_millis(T0));
    let actions = executor(&store, &clock);

    let id = actions.create(fields(json!({ "name": "Paradiso" }))).await.unwrap();

    let stored = store.get_document("venues", &id).await.unwrap().unwrap();
    assert_eq!(stored.get_str("name"), Some("Paradiso"));
    assert_eq!(stored.created_at, Some(Timestamp::from_millis(T0)));
    assert_eq!(stored.updated_at, Some(Timestamp::from_millis(T0)));
    let state = actions.state().await;
    assert!(!state.loading);
    assert_eq!(state.last_result, Some(ActionOutcome::Created(id)));
}

#[tokio::test]
async fn update_keeps_created_at_and_moves_updated_at() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(Timestamp::from_millis(T0));
    let actions = executor(&store, &clock);
    let id = actions.create(fields(json!({ "name": "Paradiso" }))).await.unwrap();

    clock.advance(std::time::Duration::from_secs(60));
    actions
        .update(&id, fields(json!({ "capacity": 1500, "createdAt": 1 })))
        .await
        .unwrap();

    let stored = store.get_document("venues", &id).await.unwrap().unwrap();
    assert_eq!(stored.created_at, Some(Timestamp::from_millis(T0)));
    assert_eq!(stored.updated_at, Some(Timestamp::from_millis(T0 + 60_000)));
    assert_eq!(stored.get_str("name"), Some("Paradiso"));
    assert_eq!(stored.get_number("capacity"), Some(1500.0));
}

#[tokio::test]
async fn delete_of_missing_record_reports_store_failure() {
    let store = MemoryStore::new();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    let actions = ActionExecutor::new(Arc::new(store), "venues")
        .on_error(move |e| seen.lock().unwrap().push(e.to_string()));

    let err = actions.delete(&RecordId::new("ghost")).await.unwrap_err();

    assert!(matches!(err, QueryError::StoreOperationFailed(_)));
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(actions.state().await.error.is_some());
}

#[tokio::test]
async fn writes_are_not_retried() {
    let store = FaultyStore::new(MemoryStore::new());
    store.fail_writes(true);
    let actions = ActionExecutor::new(store.clone(), "venues");

    assert!(actions.create(fields(json!({ "name": "x" }))).await.is_err());
    assert_eq!(store.inner().len("venues").await, 0);
}

#[tokio::test]
async fn success_clears_previous_error() {
    let store = MemoryStore::new();
    let actions = ActionExecutor::new(Arc::new(store), "venues");
    let _ = actions.delete(&RecordId::new("ghost")).await;
    assert!(actions.state().await.error.is_some());

    actions.create(fields(json!({ "name": "x" }))).await.unwrap();
    assert_eq!(actions.state().await.error, None);
}

// ── Reads ────────────────────────────────────────────────────────

#[tokio::test]
async fn get_by_id_and_query() {
    let store = common::seeded_store("venues", 3).await;
    let actions = ActionExecutor::new(Arc::new(store), "venues");

    let found = actions.get_by_id(&RecordId::new("v02")).await.unwrap();
    assert_eq!(found.unwrap().get_str("name"), Some("Venue 2"));
    assert_eq!(actions.get_by_id(&RecordId::new("nope")).await.unwrap(), None);

    let all = actions.query(&ListQuery::new().limit(2)).await.unwrap();
    assert_eq!(common::ids(&all), vec!["v01", "v02"]);
}

// ── Cache invalidation ───────────────────────────────────────────

#[tokio::test]
async fn writes_invalidate_collection_tagged_entries() {
    let store = MemoryStore::new();
    let cache = Arc::new(Cache::with_system_clock(CacheConfig::namespaced("data")).unwrap());
    cache
        .set_with_tags("venues:list", json!([]), &["venues".to_string()])
        .await;
    cache
        .set_with_tags("artists:list", json!([]), &["artists".to_string()])
        .await;
    let actions = ActionExecutor::new(Arc::new(store), "venues").with_cache(cache.clone());

    actions.create(fields(json!({ "name": "x" }))).await.unwrap();

    assert!(!cache.contains("venues:list").await);
    assert!(cache.contains("artists:list").await);
}

#[tokio::test]
async fn failed_write_leaves_cache_alone() {
    let store = FaultyStore::new(MemoryStore::new());
    store.fail_writes(true);
    let cache = Arc::new(Cache::with_system_clock(CacheConfig::namespaced("data")).unwrap());
    cache
        .set_with_tags("venues:list", json!([]), &["venues".to_string()])
        .await;
    let actions = ActionExecutor::new(store, "venues").with_cache(cache.clone());

    let _ = actions.create(fields(json!({ "name": "x" }))).await;
    assert!(cache.contains("venues:list").await);
}

// ── Batch ────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_runs_in_order() {
    let store = common::seeded_store("venues", 2).await;
    let actions = ActionExecutor::new(Arc::new(store.clone()), "venues");

    let outcomes = actions
        .batch(vec![
            BatchOperation::Update {
                id: RecordId::new("v01"),
                data: fields(json!({ "name": "Renamed" })),
            },
            BatchOperation::Delete {
                id: RecordId::new("v02"),
            },
            BatchOperation::Create {
                data: fields(json!({ "name": "New" })),
            },
        ])
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], ActionOutcome::Updated(RecordId::new("v01")));
    assert_eq!(outcomes[1], ActionOutcome::Deleted(RecordId::new("v02")));
    assert!(matches!(outcomes[2], ActionOutcome::Created(_)));
    assert_eq!(store.len("venues").await, 2);
}

#[tokio::test]
async fn batch_stops_at_first_failure_without_rollback() {
    let store = common::seeded_store("venues", 2).await;
    let actions = ActionExecutor::new(Arc::new(store.clone()), "venues");

    let err = actions
        .batch(vec![
            BatchOperation::Delete {
                id: RecordId::new("v01"),
            },
            BatchOperation::Delete {
                id: RecordId::new("missing"),
            },
            BatchOperation::Delete {
                id: RecordId::new("v02"),
            },
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::StoreOperationFailed(_)));
    let left = common::ids(&store.all("venues").await);
    assert_eq!(left, vec!["v02"]);
}

#[test]
fn batch_operation_from_json() {
    let op = BatchOperation::from_json(json!({
        "type": "update",
        "id": "v01",
        "data": { "name": "x" }
    }))
    .unwrap();
    assert_eq!(
        op,
        BatchOperation::Update {
            id: RecordId::new("v01"),
            data: fields(json!({ "name": "x" })),
        }
    );

    let err = BatchOperation::from_json(json!({ "type": "upsert", "data": {} })).unwrap_err();
    assert!(matches!(err, QueryError::Configuration(_)));
}
