//! Shared key-value tier behind the in-process cache
//!
//! Anything offering GET, SETEX and PING can back the shared tier. Two
//! implementations ship: [`RedisStore`] over a deadpool connection pool, and
//! [`MemoryStore`] for single-process deployments and tests.

use crate::error::CacheError;
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

/// Plain key-value store with per-entry expiry
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Fetch the blob stored under `key`, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, expiring after `ttl`
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Check that the store answers
    async fn ping(&self) -> Result<(), CacheError>;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// Redis-backed shared tier
pub struct RedisStore {
    pool: Pool,
    url: String,
}

impl RedisStore {
    /// Create a pool for `url`
    ///
    /// Connections are opened lazily, so an unreachable server only shows up
    /// on the first call.
    ///
    /// # Arguments
    /// * `url` - Redis URL, e.g. "redis://localhost:6379/0"
    /// * `timeout` - Bound on waiting for, creating and recycling a connection
    pub fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let mut config = Config::from_url(url);
        let mut pool_config = config.get_pool_config();
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        config.pool = Some(pool_config);

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::TierUnavailable(format!("failed to create pool: {}", e)))?;

        info!(url = %url, "Created shared cache pool");
        Ok(RedisStore {
            pool,
            url: url.to_string(),
        })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::TierUnavailable(format!("connection error: {}", e)))
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| CacheError::TierUnavailable(format!("GET failed: {}", e)))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(|e| CacheError::TierUnavailable(format!("SETEX failed: {}", e)))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::TierUnavailable(format!("PING failed: {}", e)))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("redis({})", self.url)
    }
}

struct StoredBlob {
    data: Vec<u8>,
    expires_at: Instant,
}

/// In-process shared tier with TTL, shared by every cache built on the same `Arc`
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredBlob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|blob| blob.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(blob) if blob.expires_at > Instant::now() => Ok(Some(blob.data.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.to_string(),
            StoredBlob {
                data: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set_ex("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.len(), 1);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let store = MemoryStore::new();
        store.set_ex("k", b"v".to_vec(), Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_redis_store_unreachable() {
        // Nothing listens on port 1
        let store = RedisStore::connect("redis://127.0.0.1:1/0", Duration::from_millis(200)).unwrap();

        assert!(matches!(store.get("k").await, Err(CacheError::TierUnavailable(_))));
        assert!(store.ping().await.is_err());
        assert_eq!(store.describe(), "redis(redis://127.0.0.1:1/0)");
    }
}
