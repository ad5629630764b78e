use pretty_assertions::assert_eq;
use regie_storage::{KvBackend, MemoryKv, SqliteKv};
use std::sync::Arc;

fn backends() -> Vec<Arc<dyn KvBackend>> {
    vec![
        Arc::new(MemoryKv::new()),
        Arc::new(SqliteKv::open_in_memory().unwrap()),
    ]
}

// ── Shared contract ──────────────────────────────────────────────

#[tokio::test]
async fn set_get_remove() {
    for kv in backends() {
        assert_eq!(kv.get("k").await.unwrap(), None, "{}", kv.backend_name());
        kv.set("k", "v1".into()).await.unwrap();
        kv.set("k", "v2".into()).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v2"));
        assert!(kv.remove("k").await.unwrap());
        assert!(!kv.remove("k").await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}

#[tokio::test]
async fn prefix_listing_is_exact_and_sorted() {
    for kv in backends() {
        for key in ["cache:b", "cache:a", "Cache:c", "cachex", "other:a"] {
            kv.set(key, "1".into()).await.unwrap();
        }
        assert_eq!(
            kv.keys_with_prefix("cache:").await.unwrap(),
            vec!["cache:a".to_string(), "cache:b".to_string()],
            "{}",
            kv.backend_name()
        );
    }
}

#[tokio::test]
async fn clear_prefix_leaves_other_keys() {
    for kv in backends() {
        for key in ["wizard_a", "wizard_b", "cache:x"] {
            kv.set(key, "1".into()).await.unwrap();
        }
        assert_eq!(kv.clear_prefix("wizard_").await.unwrap(), 2);
        assert_eq!(kv.keys_with_prefix("").await.unwrap(), vec!["cache:x".to_string()]);
    }
}

// ── SQLite durability ────────────────────────────────────────────

#[tokio::test]
async fn sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    {
        let kv = SqliteKv::open(&path).unwrap();
        kv.set("durable", r#"{"v":1}"#.into()).await.unwrap();
    }
    let kv = SqliteKv::open(&path).unwrap();
    assert_eq!(kv.get("durable").await.unwrap().as_deref(), Some(r#"{"v":1}"#));
}
