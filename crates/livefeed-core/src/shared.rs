//! Shared (L2) cache interface.
//!
//! The shared cache is an external service that fails independently of this
//! process. Every call made through [`fetch_bounded`] or [`spawn_set`] has
//! its failure absorbed here and turned into a miss or a dropped write, so a
//! dead or slow shared cache can only ever cost latency up to its timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Errors a shared cache backend may report.
#[derive(Debug, thiserror::Error)]
pub enum SharedCacheError {
    /// No connection could be obtained.
    #[error("shared cache unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer in time.
    #[error("shared cache timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with an error.
    #[error("shared cache error: {0}")]
    Backend(String),
}

/// Key/value store shared between processes.
///
/// Keys are logical keys (already namespaced); backends may add their own
/// deployment-wide prefix.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SharedCacheError>;

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), SharedCacheError>;

    async fn exists(&self, key: &str) -> Result<bool, SharedCacheError>;

    async fn delete(&self, key: &str) -> Result<(), SharedCacheError>;

    /// Cheap liveness probe for health reporting.
    async fn healthy(&self) -> bool;
}

pub type DynSharedCache = Arc<dyn SharedCache>;

/// Shared cache used when no backend is configured: always misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSharedCache;

#[async_trait]
impl SharedCache for NoopSharedCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, SharedCacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<(), SharedCacheError> {
        Ok(())
    }

    async fn exists(&self, _key: &str) -> Result<bool, SharedCacheError> {
        Ok(false)
    }

    async fn delete(&self, _key: &str) -> Result<(), SharedCacheError> {
        Ok(())
    }

    async fn healthy(&self) -> bool {
        false
    }
}

/// Logical caches that share one key space.
///
/// The prefixes are a wire contract with the shared cache: changing one
/// orphans every entry written by other processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Validated credentials, keyed by credential hash.
    Token,
    /// Serialized feed payloads, keyed by `kind:type_id`.
    Data,
    /// Session statuses, keyed by raw session id.
    Session,
}

impl Namespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Token => "token:",
            Self::Data => "data:",
            Self::Session => "session:",
        }
    }

    /// Build the logical key for `raw` in this namespace.
    pub fn key(&self, raw: &str) -> String {
        format!("{}{raw}", self.prefix())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Data => "data",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read `key` from the shared cache, waiting at most `timeout`.
///
/// Errors, timeouts and empty strings all read as a miss. The read runs in
/// its own task, so giving up on it does not interrupt the backend call.
pub async fn fetch_bounded(
    cache: &DynSharedCache,
    key: &str,
    timeout: Duration,
) -> Option<String> {
    let cache = Arc::clone(cache);
    let owned_key = key.to_string();
    let handle = tokio::spawn(async move { cache.get(&owned_key).await });

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(Some(value)))) if !value.is_empty() => Some(value),
        Ok(Ok(Ok(_))) => None,
        Ok(Ok(Err(e))) => {
            tracing::debug!(key = %key, error = %e, "shared cache read failed");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(key = %key, error = %e, "shared cache read task failed");
            None
        }
        Err(_) => {
            tracing::debug!(
                key = %key,
                timeout_ms = timeout.as_millis() as u64,
                "shared cache read timed out"
            );
            None
        }
    }
}

/// Write `key` to the shared cache without waiting for the result.
pub fn spawn_set(cache: &DynSharedCache, key: String, value: String, ttl_secs: u64) {
    let cache = Arc::clone(cache);
    tokio::spawn(async move {
        match cache.set(&key, &value, ttl_secs).await {
            Ok(()) => tracing::debug!(key = %key, ttl_secs, "shared cache write"),
            Err(e) => tracing::debug!(key = %key, error = %e, "shared cache write failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowCache;

    #[async_trait]
    impl SharedCache for SlowCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, SharedCacheError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Some("late".into()))
        }
        async fn set(&self, _: &str, _: &str, _: u64) -> Result<(), SharedCacheError> {
            Err(SharedCacheError::Unavailable("down".into()))
        }
        async fn exists(&self, _: &str) -> Result<bool, SharedCacheError> {
            Ok(false)
        }
        async fn delete(&self, _: &str) -> Result<(), SharedCacheError> {
            Ok(())
        }
        async fn healthy(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_namespace_keys_are_stable() {
        assert_eq!(Namespace::Token.key("abc"), "token:abc");
        assert_eq!(Namespace::Data.key("session:42"), "data:session:42");
        assert_eq!(Namespace::Session.key("S1"), "session:S1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_bounded_times_out_as_miss() {
        let cache: DynSharedCache = Arc::new(SlowCache);
        let started = tokio::time::Instant::now();

        let value = fetch_bounded(&cache, "k", Duration::from_millis(300)).await;

        assert_eq!(value, None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_noop_always_misses() {
        let cache: DynSharedCache = Arc::new(NoopSharedCache);
        cache.set("k", "v", 10).await.unwrap();

        assert_eq!(fetch_bounded(&cache, "k", Duration::from_millis(50)).await, None);
        assert!(!cache.exists("k").await.unwrap());
        assert!(!cache.healthy().await);
    }
}
