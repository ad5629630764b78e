use async_trait::async_trait;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use regie_cache::{Cache, CacheConfig, CacheEntry, CacheStrategy, Invalidation};
use regie_storage::{KvBackend, MemoryKv, SqliteKv, StoreError, StoreResult};
use regie_types::{Clock, ManualClock, Timestamp};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn clock() -> ManualClock {
    ManualClock::new(Timestamp::from_millis(1_000_000))
}

fn config(strategy: CacheStrategy) -> CacheConfig {
    CacheConfig {
        namespace: "venues".into(),
        strategy,
        ..CacheConfig::default()
    }
}

fn cache_with(config: CacheConfig, clock: &ManualClock) -> Cache {
    Cache::new(config, Arc::new(clock.clone())).unwrap()
}

fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

/// A tier whose every call fails.
struct BrokenKv;

#[async_trait]
impl KvBackend for BrokenKv {
    fn backend_name(&self) -> &'static str {
        "broken"
    }
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
    async fn set(&self, _key: &str, _value: String) -> StoreResult<()> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
    async fn remove(&self, _key: &str) -> StoreResult<bool> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
    async fn keys_with_prefix(&self, _prefix: &str) -> StoreResult<Vec<String>> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
}

/// A tier holding an undecodable entry that it refuses to remove.
struct GarbledKv;

#[async_trait]
impl KvBackend for GarbledKv {
    fn backend_name(&self) -> &'static str {
        "garbled"
    }
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Ok(Some("{not json".into()))
    }
    async fn set(&self, _key: &str, _value: String) -> StoreResult<()> {
        Ok(())
    }
    async fn remove(&self, _key: &str) -> StoreResult<bool> {
        Err(StoreError::Unavailable("read-only".into()))
    }
    async fn keys_with_prefix(&self, _prefix: &str) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }
}

// ── Configuration ────────────────────────────────────────────────

#[test]
fn config_from_json_applies_defaults_and_ignores_unknown_keys() {
    let config = CacheConfig::from_json(json!({
        "namespace": "artists",
        "strategy": "lru",
        "maxSize": 5,
        "someFutureOption": true
    }))
    .unwrap();
    assert_eq!(config.namespace, "artists");
    assert_eq!(config.strategy, CacheStrategy::Lru);
    assert_eq!(config.max_size, 5);
    assert_eq!(config.ttl, Duration::from_secs(300));
    assert_eq!(config.cleanup_interval, None);
}

#[test]
fn config_rejects_zero_max_size() {
    assert!(CacheConfig::from_json(json!({ "maxSize": 0 })).is_err());
    let config = CacheConfig {
        max_size: 0,
        ..CacheConfig::default()
    };
    assert!(Cache::new(config, Arc::new(clock())).is_err());
}

// ── TTL ──────────────────────────────────────────────────────────

#[tokio::test]
async fn ttl_entry_valid_before_expiry_and_missing_after() {
    let clock = clock();
    let cache = cache_with(
        CacheConfig {
            ttl: Duration::from_millis(100),
            ..config(CacheStrategy::Ttl)
        },
        &clock,
    );

    cache.set("k", json!("v")).await;
    clock.advance(Duration::from_millis(50));
    assert_eq!(cache.get("k").await, Some(json!("v")));

    clock.advance(Duration::from_millis(100));
    assert_eq!(cache.get("k").await, None);
    assert!(!cache.contains("k").await, "expired entry is deleted on read");
}

#[tokio::test]
async fn ttl_boundary_is_exclusive() {
    let clock = clock();
    let cache = cache_with(
        CacheConfig {
            ttl: Duration::from_millis(100),
            ..config(CacheStrategy::Ttl)
        },
        &clock,
    );
    cache.set("k", json!(1)).await;
    clock.advance(Duration::from_millis(99));
    assert!(cache.get("k").await.is_some());
    clock.advance(Duration::from_millis(1));
    assert!(cache.get("k").await.is_none());
}

#[tokio::test]
async fn rewrite_refreshes_timestamp() {
    let clock = clock();
    let cache = cache_with(
        CacheConfig {
            ttl: Duration::from_millis(100),
            ..config(CacheStrategy::Ttl)
        },
        &clock,
    );
    cache.set("k", json!(1)).await;
    clock.advance(Duration::from_millis(80));
    cache.set("k", json!(2)).await;
    clock.advance(Duration::from_millis(80));
    assert_eq!(cache.get("k").await, Some(json!(2)));
}

#[tokio::test]
async fn peek_returns_expired_entry_without_counting() {
    let clock = clock();
    let cache = cache_with(
        CacheConfig {
            ttl: Duration::from_millis(10),
            ..config(CacheStrategy::Ttl)
        },
        &clock,
    );
    cache.set("k", json!("old")).await;
    clock.advance(Duration::from_millis(50));

    let entry = cache.peek("k").await.unwrap();
    assert_eq!(entry.data, json!("old"));
    assert_eq!(entry.age(cache.now()), Duration::from_millis(50));
    let stats = cache.stats().await;
    assert_eq!((stats.hits, stats.misses), (0, 0));
}

#[tokio::test]
async fn purge_expired_only_drops_stale_entries() {
    let clock = clock();
    let cache = cache_with(
        CacheConfig {
            ttl: Duration::from_millis(100),
            ..config(CacheStrategy::Ttl)
        },
        &clock,
    );
    cache.set("old", json!(1)).await;
    clock.advance(Duration::from_millis(60));
    cache.set("new", json!(2)).await;
    clock.advance(Duration::from_millis(60));

    assert_eq!(cache.purge_expired().await, 1);
    assert!(!cache.contains("old").await);
    assert!(cache.contains("new").await);
}

#[tokio::test(start_paused = true)]
async fn cleanup_task_sweeps_on_interval_and_stops_with_cache() {
    let clock = clock();
    let cache = Arc::new(cache_with(
        CacheConfig {
            ttl: Duration::from_millis(100),
            cleanup_interval: Some(Duration::from_secs(1)),
            ..config(CacheStrategy::Ttl)
        },
        &clock,
    ));
    let handle = Cache::spawn_cleanup(&cache).unwrap();

    cache.set("k", json!(1)).await;
    clock.advance(Duration::from_millis(500));
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(cache.len().await, 0);

    drop(cache);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(handle.is_finished());
}

#[tokio::test]
async fn no_cleanup_task_without_interval() {
    let cache = Arc::new(cache_with(config(CacheStrategy::Ttl), &clock()));
    assert!(Cache::spawn_cleanup(&cache).is_none());
}

// ── LRU ──────────────────────────────────────────────────────────

#[tokio::test]
async fn lru_evicts_least_recently_used() {
    let clock = clock();
    let cache = cache_with(
        CacheConfig {
            max_size: 2,
            ..config(CacheStrategy::Lru)
        },
        &clock,
    );
    cache.set("a", json!(1)).await;
    cache.set("b", json!(2)).await;
    // Reading `a` makes `b` the eviction candidate.
    assert!(cache.get("a").await.is_some());
    cache.set("c", json!(3)).await;

    assert!(cache.contains("a").await);
    assert!(!cache.contains("b").await);
    assert!(cache.contains("c").await);
    assert_eq!(cache.recency().await, vec!["c", "a"]);
}

#[tokio::test]
async fn lru_entries_do_not_expire() {
    let clock = clock();
    let cache = cache_with(
        CacheConfig {
            ttl: Duration::from_millis(1),
            ..config(CacheStrategy::Lru)
        },
        &clock,
    );
    cache.set("a", json!(1)).await;
    clock.advance(Duration::from_secs(3600));
    assert_eq!(cache.get("a").await, Some(json!(1)));
}

proptest! {
    #[test]
    fn lru_memory_tier_never_exceeds_max_size(
        max_size in 1usize..8,
        ops in prop::collection::vec((any::<bool>(), 0u8..16), 1..64),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let cache = cache_with(
                CacheConfig { max_size, ..config(CacheStrategy::Lru) },
                &clock(),
            );
            let mut last_written = None;
            for (write, key) in ops {
                let key = format!("k{key}");
                if write {
                    cache.set(&key, json!(key)).await;
                    last_written = Some(key);
                } else {
                    let _ = cache.get(&key).await;
                }
                prop_assert!(cache.len().await <= max_size);
            }
            if let Some(key) = last_written {
                prop_assert!(cache.contains(&key).await, "most recent write survives");
            }
            Ok(())
        })?;
    }
}

// ── Tags ─────────────────────────────────────────────────────────

#[tokio::test]
async fn tag_invalidation_removes_exactly_tagged_entries() {
    let clock = clock();
    let cache = cache_with(config(CacheStrategy::Tags), &clock);
    cache.set_with_tags("a", json!(1), &tags(&["venues"])).await;
    cache.set_with_tags("b", json!(2), &tags(&["venues", "featured"])).await;
    cache.set_with_tags("c", json!(3), &tags(&["artists"])).await;
    cache.set("d", json!(4)).await;

    cache.invalidate(Invalidation::Tags(tags(&["venues"]))).await;

    assert_eq!(cache.get("a").await, None);
    assert_eq!(cache.get("b").await, None);
    assert_eq!(cache.get("c").await, Some(json!(3)));
    assert_eq!(cache.get("d").await, Some(json!(4)));
}

#[tokio::test]
async fn configured_tags_apply_to_every_write() {
    let clock = clock();
    let cache = cache_with(
        CacheConfig {
            tags: tags(&["venues"]),
            ..config(CacheStrategy::Tags)
        },
        &clock,
    );
    cache.set("a", json!(1)).await;
    cache.set_with_tags("b", json!(2), &tags(&["extra"])).await;
    assert_eq!(cache.get_entry("b").await.unwrap().tags, tags(&["venues", "extra"]));

    cache.invalidate(Invalidation::Tags(tags(&["venues"]))).await;
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn tag_invalidation_reaches_persisted_entries_from_earlier_runs() {
    let clock = clock();
    let durable = Arc::new(MemoryKv::new());
    let earlier = CacheEntry::new(json!("stale"), clock.now(), tags(&["venues"]));
    durable
        .set("venues:old", serde_json::to_string(&earlier).unwrap())
        .await
        .unwrap();
    durable
        .set(
            "venues:keep",
            serde_json::to_string(&CacheEntry::new(json!(1), clock.now(), tags(&["other"])))
                .unwrap(),
        )
        .await
        .unwrap();

    let cache = cache_with(config(CacheStrategy::Tags), &clock).with_durable_tier(durable.clone());
    cache.invalidate(Invalidation::Tags(tags(&["venues"]))).await;

    assert_eq!(durable.get("venues:old").await.unwrap(), None);
    assert!(durable.get("venues:keep").await.unwrap().is_some());
}

// ── Tiers ────────────────────────────────────────────────────────

#[tokio::test]
async fn writes_reach_every_tier_with_namespaced_keys() {
    let clock = clock();
    let session = Arc::new(MemoryKv::new());
    let durable = Arc::new(SqliteKv::open_in_memory().unwrap());
    let cache = cache_with(config(CacheStrategy::Ttl), &clock)
        .with_session_tier(session.clone())
        .with_durable_tier(durable.clone());

    cache.set("list", json!([1, 2])).await;

    let tiers: [Arc<dyn KvBackend>; 2] = [session.clone(), durable.clone()];
    for tier in tiers {
        let raw = tier.get("venues:list").await.unwrap().unwrap();
        let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.data, json!([1, 2]));
        assert_eq!(entry.timestamp, clock.now());
    }
}

#[tokio::test]
async fn lower_tier_hit_is_promoted() {
    let clock = clock();
    let session = Arc::new(MemoryKv::new());
    let durable = Arc::new(MemoryKv::new());
    let entry = CacheEntry::new(json!("persisted"), clock.now(), Vec::new());
    durable
        .set("venues:k", serde_json::to_string(&entry).unwrap())
        .await
        .unwrap();

    let cache = cache_with(config(CacheStrategy::Ttl), &clock)
        .with_session_tier(session.clone())
        .with_durable_tier(durable.clone());

    assert!(!cache.contains("k").await);
    assert_eq!(cache.get("k").await, Some(json!("persisted")));
    assert!(cache.contains("k").await);
    assert!(session.get("venues:k").await.unwrap().is_some());
}

#[tokio::test]
async fn expired_persisted_entry_is_removed_and_missed() {
    let clock = clock();
    let durable = Arc::new(MemoryKv::new());
    let entry = CacheEntry::new(json!(1), clock.now(), Vec::new());
    durable
        .set("venues:k", serde_json::to_string(&entry).unwrap())
        .await
        .unwrap();
    clock.advance(Duration::from_secs(301));

    let cache = cache_with(config(CacheStrategy::Ttl), &clock).with_durable_tier(durable.clone());
    assert_eq!(cache.get("k").await, None);
    assert_eq!(durable.get("venues:k").await.unwrap(), None);
}

#[tokio::test]
async fn durable_sqlite_tier_survives_a_new_cache_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let clock = clock();
    {
        let durable = Arc::new(SqliteKv::open(&path).unwrap());
        let cache = cache_with(config(CacheStrategy::Ttl), &clock).with_durable_tier(durable);
        cache.set("k", json!({ "name": "Hall" })).await;
    }
    let durable = Arc::new(SqliteKv::open(&path).unwrap());
    let cache = cache_with(config(CacheStrategy::Ttl), &clock).with_durable_tier(durable);
    assert_eq!(cache.get("k").await, Some(json!({ "name": "Hall" })));
}

#[tokio::test]
async fn failing_tier_degrades_to_miss() {
    let clock = clock();
    let cache = cache_with(config(CacheStrategy::Ttl), &clock).with_durable_tier(Arc::new(BrokenKv));

    assert_eq!(cache.get("missing").await, None);
    cache.set("k", json!(1)).await;
    assert_eq!(cache.get("k").await, Some(json!(1)));
    cache.invalidate(Invalidation::All).await;
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn undecodable_entry_that_cannot_be_removed_is_a_miss() {
    let clock = clock();
    let cache = cache_with(config(CacheStrategy::Ttl), &clock).with_durable_tier(Arc::new(GarbledKv));

    assert_eq!(cache.get("k").await, None);
    assert_eq!(cache.stats().await.misses, 1);
    cache.set("k", json!(2)).await;
    assert_eq!(cache.get("k").await, Some(json!(2)));
}

// ── Invalidation ─────────────────────────────────────────────────

#[tokio::test]
async fn invalidate_all_clears_only_this_namespace() {
    let clock = clock();
    let shared = Arc::new(MemoryKv::new());
    let venues = cache_with(config(CacheStrategy::Ttl), &clock).with_session_tier(shared.clone());
    let artists =
        cache_with(CacheConfig::namespaced("artists"), &clock).with_session_tier(shared.clone());

    venues.set("a", json!(1)).await;
    venues.set("b", json!(2)).await;
    artists.set("a", json!(3)).await;

    venues.invalidate(Invalidation::All).await;

    assert!(venues.is_empty().await);
    assert!(venues.recency().await.is_empty());
    assert_eq!(
        shared.keys_with_prefix("").await.unwrap(),
        vec!["artists:a".to_string()]
    );
    assert_eq!(artists.get("a").await, Some(json!(3)));
}

#[tokio::test]
async fn invalidate_key_removes_from_every_tier() {
    let clock = clock();
    let session = Arc::new(MemoryKv::new());
    let cache = cache_with(config(CacheStrategy::Ttl), &clock).with_session_tier(session.clone());
    cache.set("a", json!(1)).await;
    cache.set("b", json!(2)).await;

    cache.invalidate(Invalidation::Key("a".into())).await;

    assert_eq!(cache.get("a").await, None);
    assert_eq!(cache.get("b").await, Some(json!(2)));
    assert_eq!(session.get("venues:a").await.unwrap(), None);
}

// ── Typed access and stats ───────────────────────────────────────

#[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct Venue {
    name: String,
    capacity: u32,
}

#[tokio::test]
async fn typed_round_trip_and_shape_mismatch_is_a_miss() {
    let cache = cache_with(config(CacheStrategy::Ttl), &clock());
    let venue = Venue {
        name: "Hall".into(),
        capacity: 300,
    };
    cache.set_as("v", &venue).await.unwrap();
    assert_eq!(cache.get_as::<Venue>("v").await, Some(venue));
    assert_eq!(cache.get_as::<Vec<u8>>("v").await, None);
}

#[tokio::test]
async fn stats_track_hits_and_misses() {
    let cache = cache_with(config(CacheStrategy::Ttl), &clock());
    assert_eq!(cache.stats().await.hit_rate, 0.0);

    cache.set("a", json!(1)).await;
    let _ = cache.get("a").await;
    let _ = cache.get("a").await;
    let _ = cache.get("a").await;
    let _ = cache.get("b").await;

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_rate, 0.75);
    assert_eq!(stats.size, 1);
}
