//! Memoized execution of text computations
//!
//! [`CachingExecutor`] owns one [`TieredCache`] per operation and wraps any
//! pure `compute(text, options)` with a lookup before and a write after. The
//! computation must be deterministic for its inputs; nothing checks this.

use crate::cache_key::CacheKey;
use crate::config::CacheConfig;
use crate::error::{MeshError, Result};
use crate::metrics::MeshMetrics;
use crate::models::TextOptions;
use crate::shared_store::SharedStore;
use crate::tiered_cache::{CacheStats, CacheSwitch, TieredCache};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Per-operation caches in front of arbitrary computations
pub struct CachingExecutor<V> {
    caches: HashMap<String, TieredCache<V>>,
    switch: CacheSwitch,
    /// Bounds concurrent `spawn_blocking` computations
    workers: Arc<Semaphore>,
}

impl<V> CachingExecutor<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create an executor with no caches yet
    ///
    /// # Arguments
    /// * `switch` - Runtime enable/disable toggle shared with every cache
    /// * `max_blocking_tasks` - Worker pool size for [`Self::execute_offloaded`]
    pub fn new(switch: CacheSwitch, max_blocking_tasks: usize) -> Self {
        CachingExecutor {
            caches: HashMap::new(),
            switch,
            workers: Arc::new(Semaphore::new(max_blocking_tasks.max(1))),
        }
    }

    /// Build one cache per entry of `operations`, all sharing `shared` as L2
    pub fn from_config(
        operations: &[&str],
        config: &CacheConfig,
        shared: Option<Arc<dyn SharedStore>>,
        switch: CacheSwitch,
        max_blocking_tasks: usize,
        metrics: Option<MeshMetrics>,
    ) -> Self {
        let mut executor = Self::new(switch.clone(), max_blocking_tasks);
        for operation in operations {
            let mut cache =
                TieredCache::from_config(*operation, config, shared.clone(), switch.clone());
            if let Some(metrics) = &metrics {
                cache = cache.with_metrics(metrics.clone());
            }
            executor = executor.with_cache(cache);
        }
        executor
    }

    /// Register `cache` under its operation name
    pub fn with_cache(mut self, cache: TieredCache<V>) -> Self {
        self.caches.insert(cache.operation().to_string(), cache);
        self
    }

    pub fn cache(&self, operation: &str) -> Option<&TieredCache<V>> {
        self.caches.get(operation)
    }

    pub fn switch(&self) -> &CacheSwitch {
        &self.switch
    }

    /// Stats for every operation, ordered by name
    pub fn stats(&self) -> BTreeMap<String, CacheStats> {
        self.caches
            .iter()
            .map(|(operation, cache)| (operation.clone(), cache.stats()))
            .collect()
    }

    /// Report whether any cache's shared tier answers PING
    pub async fn ping_l2(&self) -> bool {
        for cache in self.caches.values() {
            if cache.has_shared_tier() {
                return cache.ping_l2().await;
            }
        }
        false
    }

    /// Return the memoized result of `compute(text, options)`
    ///
    /// On a hit `compute` is not invoked. While caching is disabled, or for an
    /// operation with no cache, `compute` runs directly and nothing is stored.
    pub async fn execute<F>(&self, operation: &str, text: &str, options: &TextOptions, compute: F) -> V
    where
        F: FnOnce(&str, &TextOptions) -> V,
    {
        let cache = match self.lookup_target(operation) {
            Some(cache) => cache,
            None => return compute(text, options),
        };

        let key = CacheKey::derive(text, options);
        if let Some((value, tier)) = cache.get(&key).await {
            debug!(operation, tier = tier.as_str(), "Serving cached result");
            return value;
        }

        let value = compute(text, options);
        cache.put(&key, value.clone()).await;
        value
    }

    /// Same as [`Self::execute`], running `compute` on the blocking worker pool
    ///
    /// Cache lookups stay on the calling task; at most `max_blocking_tasks`
    /// computations run at once.
    pub async fn execute_offloaded<F>(
        &self,
        operation: &str,
        text: &str,
        options: &TextOptions,
        compute: F,
    ) -> Result<V>
    where
        F: FnOnce(&str, &TextOptions) -> V + Send + 'static,
    {
        let cache = self.lookup_target(operation);
        let key = CacheKey::derive(text, options);

        if let Some(cache) = cache {
            if let Some((value, tier)) = cache.get(&key).await {
                debug!(operation, tier = tier.as_str(), "Serving cached result");
                return Ok(value);
            }
        }

        let value = self.run_blocking(text, options, compute).await?;

        if let Some(cache) = cache {
            cache.put(&key, value.clone()).await;
        }
        Ok(value)
    }

    fn lookup_target(&self, operation: &str) -> Option<&TieredCache<V>> {
        if !self.switch.is_enabled() {
            return None;
        }
        let cache = self.caches.get(operation);
        if cache.is_none() {
            warn!(operation, "No cache registered for operation, running uncached");
        }
        cache
    }

    async fn run_blocking<F>(&self, text: &str, options: &TextOptions, compute: F) -> Result<V>
    where
        F: FnOnce(&str, &TextOptions) -> V + Send + 'static,
    {
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| MeshError::InternalError(format!("worker pool closed: {}", e)))?;

        let text = text.to_string();
        let options = options.clone();
        tokio::task::spawn_blocking(move || compute(&text, &options))
            .await
            .map_err(|e| MeshError::InternalError(format!("computation failed: {}", e)))
    }
}
