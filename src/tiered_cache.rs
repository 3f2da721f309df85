//! Two-tier cache with an in-process L1 and a shared L2
//!
//! This module provides the memoization layer for one operation:
//! - L1 Cache: bounded in-process map with least-recently-used eviction
//! - L2 Cache: optional shared key-value store with per-entry TTL
//!
//! Features:
//! - Lookup order L1, then L2, then miss
//! - L2 hits are promoted into L1
//! - Writes go through to both tiers
//! - Any L2 failure is logged, counted and treated as a miss
//! - A runtime switch disables both tiers without a restart

use crate::cache_key::CacheKey;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::metrics::MeshMetrics;
use crate::shared_store::SharedStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Tier that answered a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    L1,
    L2,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
        }
    }
}

/// Process-wide cache on/off toggle, read on every call
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct CacheSwitch(Arc<AtomicBool>);

impl CacheSwitch {
    pub fn new(enabled: bool) -> Self {
        CacheSwitch(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

impl Default for CacheSwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Monotonic lookup counters for one operation
#[derive(Debug, Default)]
struct CacheCounters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    l2_errors: AtomicU64,
}

/// Point-in-time view of a cache's counters and occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub l2_errors: u64,
}

impl CacheStats {
    /// Every `get` lands in exactly one of these
    pub fn lookups(&self) -> u64 {
        self.l1_hits + self.l2_hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            (self.l1_hits + self.l2_hits) as f64 / lookups as f64
        }
    }
}

/// L1 entry with access tracking
struct L1Entry<V> {
    value: V,
    last_accessed: u64,
}

/// L1 storage; `clock` orders accesses for LRU
struct L1Storage<V> {
    entries: HashMap<CacheKey, L1Entry<V>>,
    clock: u64,
}

impl<V> L1Storage<V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Shared tier attachment
struct SharedTier {
    store: Arc<dyn SharedStore>,
    namespace: String,
    ttl: Duration,
    call_timeout: Duration,
}

/// Two-tier cache for the results of one operation
pub struct TieredCache<V> {
    operation: String,

    // L1: In-memory cache
    l1: Mutex<L1Storage<V>>,
    capacity: usize,

    // L2: Shared cache
    l2: Option<SharedTier>,

    switch: CacheSwitch,
    counters: CacheCounters,
    metrics: Option<MeshMetrics>,
}

impl<V> TieredCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Create a memory-only cache (L2 absent)
    ///
    /// # Arguments
    /// * `operation` - Operation whose results are cached, e.g. "clean"
    /// * `capacity` - Maximum number of L1 entries (at least 1)
    /// * `switch` - Runtime enable/disable toggle
    pub fn new(operation: impl Into<String>, capacity: usize, switch: CacheSwitch) -> Self {
        TieredCache {
            operation: operation.into(),
            l1: Mutex::new(L1Storage {
                entries: HashMap::new(),
                clock: 0,
            }),
            capacity: capacity.max(1),
            l2: None,
            switch,
            counters: CacheCounters::default(),
            metrics: None,
        }
    }

    /// Create a cache from configuration, attaching `shared` as L2 when given
    pub fn from_config(
        operation: impl Into<String>,
        config: &CacheConfig,
        shared: Option<Arc<dyn SharedStore>>,
        switch: CacheSwitch,
    ) -> Self {
        let cache = Self::new(operation, config.l1_capacity, switch);
        match shared {
            Some(store) => cache.with_shared_tier(
                store,
                config.namespace.clone(),
                Duration::from_secs(config.l2_ttl_secs),
                Duration::from_millis(config.l2_timeout_ms),
            ),
            None => cache,
        }
    }

    /// Attach a shared tier
    ///
    /// # Arguments
    /// * `store` - Shared key-value store
    /// * `namespace` - Prefix of every L2 key
    /// * `ttl` - Expiry of every L2 write
    /// * `call_timeout` - Bound on each L2 call
    pub fn with_shared_tier(
        mut self,
        store: Arc<dyn SharedStore>,
        namespace: impl Into<String>,
        ttl: Duration,
        call_timeout: Duration,
    ) -> Self {
        let namespace = namespace.into();
        info!(
            operation = %self.operation,
            store = %store.describe(),
            namespace = %namespace,
            ttl_secs = ttl.as_secs(),
            "Attached shared cache tier"
        );
        self.l2 = Some(SharedTier {
            store,
            namespace,
            ttl,
            call_timeout,
        });
        self
    }

    /// Count lookups and L2 errors in `metrics` as well
    pub fn with_metrics(mut self, metrics: MeshMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_shared_tier(&self) -> bool {
        self.l2.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.switch.is_enabled()
    }

    /// Number of L1 entries
    pub fn len(&self) -> usize {
        self.lock_l1().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookup a value (checks L1 then L2)
    ///
    /// Increments exactly one of the hit/miss counters. Never fails: L2 errors
    /// are logged and reported as a miss.
    ///
    /// # Returns
    /// The cached value and the tier that held it, or `None` on a miss
    pub async fn get(&self, key: &CacheKey) -> Option<(V, CacheTier)> {
        if !self.switch.is_enabled() {
            self.record_miss(key);
            return None;
        }

        // Try L1 first; the lock is released before any L2 call
        if let Some(value) = self.lookup_l1(key) {
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            self.record_lookup(CacheTier::L1.as_str());
            debug!(operation = %self.operation, key = %key, "L1 cache hit");
            return Some((value, CacheTier::L1));
        }

        if let Some(value) = self.lookup_l2(key).await {
            // Promote to L1
            self.store_l1(key, value.clone());
            self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
            self.record_lookup(CacheTier::L2.as_str());
            debug!(operation = %self.operation, key = %key, "L2 cache hit (promoted to L1)");
            return Some((value, CacheTier::L2));
        }

        self.record_miss(key);
        None
    }

    /// Store a value in L1 and, when attached, L2
    ///
    /// No-op while the cache is disabled. Never fails.
    pub async fn put(&self, key: &CacheKey, value: V) {
        if !self.switch.is_enabled() {
            return;
        }

        let blob = match &self.l2 {
            Some(_) => match bincode::serialize(&value) {
                Ok(blob) => Some(blob),
                Err(e) => {
                    self.record_l2_error("serialize", &CacheError::from(e));
                    None
                }
            },
            None => None,
        };

        self.store_l1(key, value);

        if let (Some(tier), Some(blob)) = (&self.l2, blob) {
            let l2_key = key.namespaced(&tier.namespace, &self.operation);
            let result = self
                .bounded(tier, "SETEX", tier.store.set_ex(&l2_key, blob, tier.ttl))
                .await;
            match result {
                Ok(()) => debug!(operation = %self.operation, key = %l2_key, "Stored in L2"),
                Err(e) => self.record_l2_error("put", &e),
            }
        }
    }

    /// Report whether the shared tier answers PING; `false` when absent
    pub async fn ping_l2(&self) -> bool {
        let tier = match &self.l2 {
            Some(tier) => tier,
            None => return false,
        };

        match self.bounded(tier, "PING", tier.store.ping()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    operation = %self.operation,
                    store = %tier.store.describe(),
                    "Shared cache tier not reachable: {}",
                    e
                );
                false
            }
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            l1_hits: self.counters.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.counters.l2_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            l2_errors: self.counters.l2_errors.load(Ordering::Relaxed),
        }
    }

    /// Drop every L1 entry; counters are kept
    pub fn clear_l1(&self) {
        let mut storage = self.lock_l1();
        let removed = storage.entries.len();
        storage.entries.clear();
        info!(operation = %self.operation, removed, "Cleared L1 cache");
    }

    fn lock_l1(&self) -> MutexGuard<'_, L1Storage<V>> {
        self.l1.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup_l1(&self, key: &CacheKey) -> Option<V> {
        let mut storage = self.lock_l1();
        let now = storage.tick();
        storage.entries.get_mut(key).map(|entry| {
            entry.last_accessed = now;
            entry.value.clone()
        })
    }

    /// Store in L1 cache with LRU eviction
    fn store_l1(&self, key: &CacheKey, value: V) {
        let mut storage = self.lock_l1();
        let now = storage.tick();

        if !storage.entries.contains_key(key) {
            while storage.entries.len() >= self.capacity {
                let lru_key = storage
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_accessed)
                    .map(|(k, _)| *k);
                match lru_key {
                    Some(lru_key) => {
                        storage.entries.remove(&lru_key);
                        debug!(operation = %self.operation, key = %lru_key, "Evicted LRU entry from L1");
                    }
                    None => break,
                }
            }
        }

        storage.entries.insert(
            *key,
            L1Entry {
                value,
                last_accessed: now,
            },
        );
    }

    async fn lookup_l2(&self, key: &CacheKey) -> Option<V> {
        let tier = self.l2.as_ref()?;
        let l2_key = key.namespaced(&tier.namespace, &self.operation);

        let blob = match self.bounded(tier, "GET", tier.store.get(&l2_key)).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                self.record_l2_error("get", &e);
                return None;
            }
        };

        match bincode::deserialize::<V>(&blob) {
            Ok(value) => Some(value),
            Err(e) => {
                self.record_l2_error("deserialize", &CacheError::from(e));
                None
            }
        }
    }

    /// Run an L2 call under the tier's call timeout
    async fn bounded<T>(
        &self,
        tier: &SharedTier,
        command: &str,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        match timeout(tier.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::TierUnavailable(format!(
                "{} timed out after {:?}",
                command, tier.call_timeout
            ))),
        }
    }

    fn record_miss(&self, key: &CacheKey) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.record_lookup("miss");
        debug!(operation = %self.operation, key = %key, "Cache miss");
    }

    fn record_lookup(&self, tier: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(&self.operation, tier);
        }
    }

    fn record_l2_error(&self, action: &str, error: &CacheError) {
        self.counters.l2_errors.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_l2_error(&self.operation);
        }
        warn!(
            operation = %self.operation,
            action,
            "Shared cache tier failed, continuing without it: {}",
            error
        );
    }
}
