use regie_storage::KvBackend;
use regie_types::{SharedClock, SystemClock, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{CacheConfig, CacheStrategy};
use crate::entry::CacheEntry;
use crate::error::CacheResult;

/// What to drop from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Every entry in this cache's namespace, in every tier.
    All,
    /// One key.
    Key(String),
    /// Every entry carrying at least one of these tags.
    Tags(Vec<String>),
}

/// Hit/miss counters. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
}

#[derive(Debug, Default)]
struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    /// Most recently used at the front.
    recency: VecDeque<String>,
    /// Tag → keys written with that tag.
    tag_index: HashMap<String, HashSet<String>>,
}

impl MemoryTier {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        self.recency.push_front(key.to_string());
    }

    fn insert(&mut self, key: &str, entry: CacheEntry) {
        for tag in &entry.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.entries.insert(key.to_string(), entry);
        self.touch(key);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        Some(entry)
    }

    /// Drops least recently used entries until at most `max` remain.
    fn evict_to(&mut self, max: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > max {
            let Some(key) = self.recency.back().cloned() else {
                break;
            };
            self.remove(&key);
            evicted.push(key);
        }
        evicted
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.tag_index.clear();
    }
}

/// A namespaced, multi-tier cache of JSON values.
pub struct Cache {
    config: CacheConfig,
    clock: SharedClock,
    memory: Mutex<MemoryTier>,
    session: Option<Arc<dyn KvBackend>>,
    durable: Option<Arc<dyn KvBackend>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    /// Creates a memory-only cache reading the system clock.
    pub fn with_system_clock(config: CacheConfig) -> CacheResult<Self> {
        Self::new(config, Arc::new(SystemClock))
    }

    /// Creates a memory-only cache reading the given clock.
    pub fn new(config: CacheConfig, clock: SharedClock) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            memory: Mutex::new(MemoryTier::default()),
            session: None,
            durable: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Adds the session-scoped tier.
    pub fn with_session_tier(mut self, backend: Arc<dyn KvBackend>) -> Self {
        self.session = Some(backend);
        self
    }

    /// Adds the durable tier.
    pub fn with_durable_tier(mut self, backend: Arc<dyn KvBackend>) -> Self {
        self.durable = Some(backend);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Current time according to the cache's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace, key)
    }

    fn prefix(&self) -> String {
        format!("{}:", self.config.namespace)
    }

    fn is_valid(&self, entry: &CacheEntry, now: Timestamp) -> bool {
        match self.config.strategy {
            CacheStrategy::Ttl => entry.is_fresh(now, self.config.ttl),
            CacheStrategy::Lru | CacheStrategy::Tags => true,
        }
    }

    fn persisted_tiers(&self) -> impl Iterator<Item = (&'static str, &Arc<dyn KvBackend>)> {
        [("session", self.session.as_ref()), ("durable", self.durable.as_ref())]
            .into_iter()
            .filter_map(|(name, tier)| tier.map(|t| (name, t)))
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Returns the cached value for `key`, or `None` on a miss.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key).await.map(|e| e.data)
    }

    /// Typed variant of [`Cache::get`]. Undecodable entries count as a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Returns the full entry for `key`, consulting tiers in priority order.
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let full_key = self.full_key(key);
        let now = self.clock.now();

        {
            let mut memory = self.memory.lock().await;
            if let Some(entry) = memory.entries.get(&full_key).cloned() {
                if self.is_valid(&entry, now) {
                    if self.config.strategy == CacheStrategy::Lru {
                        memory.touch(&full_key);
                    }
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %full_key, tier = "memory", "cache hit");
                    return Some(entry);
                }
                debug!(key = %full_key, "cache entry expired");
                memory.remove(&full_key);
            }
        }

        let mut upper: Vec<&Arc<dyn KvBackend>> = Vec::new();
        for (name, tier) in self.persisted_tiers() {
            if let Some(entry) = self.read_tier(name, tier, &full_key, now).await {
                for above in &upper {
                    self.write_tier(above, &full_key, &entry).await;
                }
                self.insert_memory(&full_key, entry.clone()).await;
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %full_key, tier = name, "cache hit, promoted");
                return Some(entry);
            }
            upper.push(tier);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %full_key, "cache miss");
        None
    }

    /// Reads an entry regardless of expiry, without touching statistics,
    /// recency or any tier. Used to serve stale data while revalidating.
    pub async fn peek(&self, key: &str) -> Option<CacheEntry> {
        let full_key = self.full_key(key);
        if let Some(entry) = self.memory.lock().await.entries.get(&full_key) {
            return Some(entry.clone());
        }
        for (name, tier) in self.persisted_tiers() {
            match tier.get(&full_key).await {
                Ok(Some(raw)) => {
                    if let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) {
                        return Some(entry);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(key = %full_key, tier = name, error = %e, "cache tier read failed"),
            }
        }
        None
    }

    async fn read_tier(
        &self,
        name: &'static str,
        tier: &Arc<dyn KvBackend>,
        full_key: &str,
        now: Timestamp,
    ) -> Option<CacheEntry> {
        let raw = match tier.get(full_key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = full_key, tier = name, error = %e, "cache tier read failed");
                return None;
            }
        };
        let entry = match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = full_key, tier = name, error = %e, "dropping undecodable cache entry");
                if let Err(e) = tier.remove(full_key).await {
                    warn!(key = full_key, tier = name, error = %e, "failed to drop undecodable entry");
                }
                return None;
            }
        };
        if self.is_valid(&entry, now) {
            Some(entry)
        } else {
            debug!(key = full_key, tier = name, "cache entry expired");
            if let Err(e) = tier.remove(full_key).await {
                warn!(key = full_key, tier = name, error = %e, "failed to drop expired entry");
            }
            None
        }
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Caches `data` under `key` with the configured tags.
    pub async fn set(&self, key: &str, data: Value) {
        self.set_with_tags(key, data, &[]).await;
    }

    /// Typed variant of [`Cache::set`].
    pub async fn set_as<T: Serialize>(&self, key: &str, data: &T) -> CacheResult<()> {
        let value = serde_json::to_value(data)?;
        self.set(key, value).await;
        Ok(())
    }

    /// Caches `data` under `key`, tagged with the configured tags plus `tags`.
    pub async fn set_with_tags(&self, key: &str, data: Value, tags: &[String]) {
        let full_key = self.full_key(key);
        let mut all_tags = self.config.tags.clone();
        for tag in tags {
            if !all_tags.contains(tag) {
                all_tags.push(tag.clone());
            }
        }
        let entry = CacheEntry::new(data, self.clock.now(), all_tags);

        self.insert_memory(&full_key, entry.clone()).await;
        for (_, tier) in self.persisted_tiers() {
            self.write_tier(tier, &full_key, &entry).await;
        }
    }

    async fn insert_memory(&self, full_key: &str, entry: CacheEntry) {
        let mut memory = self.memory.lock().await;
        memory.remove(full_key);
        memory.insert(full_key, entry);
        for key in memory.evict_to(self.config.max_size) {
            debug!(key = %key, "evicted from memory tier");
        }
    }

    async fn write_tier(&self, tier: &Arc<dyn KvBackend>, full_key: &str, entry: &CacheEntry) {
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = full_key, error = %e, "cache entry not serializable");
                return;
            }
        };
        if let Err(e) = tier.set(full_key, raw).await {
            warn!(key = full_key, tier = tier.backend_name(), error = %e, "cache tier write failed");
        }
    }

    // ── Invalidation ─────────────────────────────────────────────

    /// Drops entries from every tier.
    pub async fn invalidate(&self, what: Invalidation) {
        match what {
            Invalidation::All => self.invalidate_all().await,
            Invalidation::Key(key) => {
                let full_key = self.full_key(&key);
                self.memory.lock().await.remove(&full_key);
                for (name, tier) in self.persisted_tiers() {
                    if let Err(e) = tier.remove(&full_key).await {
                        warn!(key = %full_key, tier = name, error = %e, "cache tier remove failed");
                    }
                }
                debug!(key = %full_key, "cache key invalidated");
            }
            Invalidation::Tags(tags) => self.invalidate_tags(&tags).await,
        }
    }

    async fn invalidate_all(&self) {
        self.memory.lock().await.clear();
        let prefix = self.prefix();
        for (name, tier) in self.persisted_tiers() {
            if let Err(e) = tier.clear_prefix(&prefix).await {
                warn!(prefix = %prefix, tier = name, error = %e, "cache tier clear failed");
            }
        }
        debug!(namespace = %self.config.namespace, "cache cleared");
    }

    async fn invalidate_tags(&self, tags: &[String]) {
        let mut doomed: HashSet<String> = HashSet::new();
        {
            let mut memory = self.memory.lock().await;
            for tag in tags {
                if let Some(keys) = memory.tag_index.remove(tag) {
                    doomed.extend(keys);
                }
            }
            for key in &doomed {
                memory.remove(key);
            }
        }

        // Persisted tiers may hold entries written before this process
        // started, which the in-memory index never saw.
        let prefix = self.prefix();
        for (name, tier) in self.persisted_tiers() {
            let keys = match tier.keys_with_prefix(&prefix).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(tier = name, error = %e, "cache tier scan failed");
                    continue;
                }
            };
            for key in keys {
                let tagged = doomed.contains(&key)
                    || matches!(
                        tier.get(&key).await,
                        Ok(Some(raw)) if serde_json::from_str::<CacheEntry>(&raw)
                            .is_ok_and(|e| e.has_any_tag(tags))
                    );
                if tagged && let Err(e) = tier.remove(&key).await {
                    warn!(key = %key, tier = name, error = %e, "cache tier remove failed");
                }
            }
        }
        debug!(tags = ?tags, removed = doomed.len(), "cache tags invalidated");
    }

    // ── Maintenance ──────────────────────────────────────────────

    /// Removes expired entries from the memory tier. Returns how many went.
    pub async fn purge_expired(&self) -> usize {
        if self.config.strategy != CacheStrategy::Ttl {
            return 0;
        }
        let now = self.clock.now();
        let mut memory = self.memory.lock().await;
        let expired: Vec<String> = memory
            .entries
            .iter()
            .filter(|(_, e)| !e.is_fresh(now, self.config.ttl))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            memory.remove(key);
        }
        expired.len()
    }

    /// Starts the periodic cleanup sweep, if configured. The task stops on
    /// its own once the cache is dropped.
    pub fn spawn_cleanup(cache: &Arc<Cache>) -> Option<JoinHandle<()>> {
        let period = cache.config.cleanup_interval?;
        let weak: Weak<Cache> = Arc::downgrade(cache);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    return;
                };
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    debug!(namespace = %cache.config.namespace, purged, "cache cleanup sweep");
                }
            }
        }))
    }

    // ── Introspection ────────────────────────────────────────────

    /// Hit/miss counters and the current memory tier size.
    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            size: self.len().await,
        }
    }

    /// Number of entries in the memory tier.
    pub async fn len(&self) -> usize {
        self.memory.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether the memory tier holds `key`, expired or not.
    pub async fn contains(&self, key: &str) -> bool {
        self.memory.lock().await.entries.contains_key(&self.full_key(key))
    }

    /// Memory tier keys from most to least recently used, namespace stripped.
    pub async fn recency(&self) -> Vec<String> {
        let prefix = self.prefix();
        self.memory
            .lock()
            .await
            .recency
            .iter()
            .map(|k| k.strip_prefix(&prefix).unwrap_or(k).to_string())
            .collect()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("session", &self.session.as_ref().map(|t| t.backend_name()))
            .field("durable", &self.durable.as_ref().map(|t| t.backend_name()))
            .finish()
    }
}
