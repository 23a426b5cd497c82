//! Redis implementation of the shared (L2) cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use livefeed_core::{DynSharedCache, NoopSharedCache, SharedCache, SharedCacheError};
use redis::AsyncCommands;

use crate::config::RedisConfig;

/// Shared cache over a deadpool Redis pool.
///
/// Every logical key is stored as `key_prefix + key`, so several deployments
/// can share one Redis without colliding.
#[derive(Clone)]
pub struct RedisSharedCache {
    pool: Pool,
    key_prefix: String,
}

impl RedisSharedCache {
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
        }
    }

    /// The physical Redis key for a logical key.
    pub fn redis_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn conn(&self) -> Result<Connection, SharedCacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| SharedCacheError::Unavailable(e.to_string()))
    }
}

fn backend(e: redis::RedisError) -> SharedCacheError {
    SharedCacheError::Backend(e.to_string())
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, SharedCacheError> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<String>>(self.redis_key(key))
            .await
            .map_err(backend)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), SharedCacheError> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(self.redis_key(key), value, ttl_secs)
            .await
            .map_err(backend)
    }

    async fn exists(&self, key: &str) -> Result<bool, SharedCacheError> {
        let mut conn = self.conn().await?;
        conn.exists::<_, bool>(self.redis_key(key))
            .await
            .map_err(backend)
    }

    async fn delete(&self, key: &str) -> Result<(), SharedCacheError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.redis_key(key)).await.map_err(backend)
    }

    async fn healthy(&self) -> bool {
        let Ok(mut conn) = self.conn().await else {
            return false;
        };
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        matches!(pong.as_deref(), Ok("PONG"))
    }
}

/// Create the shared cache described by `config`.
///
/// - **Redis disabled**: returns the no-op cache (local tier only)
/// - **Redis enabled**: connects, and falls back to the no-op cache on failure
///
/// The server always starts, with or without Redis.
pub async fn create_shared_cache(config: &RedisConfig) -> DynSharedCache {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return Arc::new(NoopSharedCache);
    }

    tracing::info!(url = %config.url, prefix = %config.key_prefix, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Some(Duration::from_millis(config.timeout_ms));
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    pool_config.timeouts.recycle = timeout;
    redis_config.pool = Some(pool_config);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return Arc::new(NoopSharedCache);
        }
    };

    let cache = RedisSharedCache::new(pool, config.key_prefix.clone());
    if cache.healthy().await {
        tracing::info!("Connected to Redis");
        Arc::new(cache)
    } else {
        tracing::warn!("Redis did not answer PING. Falling back to local cache.");
        Arc::new(NoopSharedCache)
    }
}
