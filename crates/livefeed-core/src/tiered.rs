//! Read-through lookup across the local map, the shared cache and a fallback.
//!
//! ## Lookup Order
//!
//! ```text
//! get_or_fetch(key) → L1 (TtlMap) → L2 (shared, bounded wait) → fallback()
//!                        hit ↩           hit: write L1 ↩        ok: write L1, spawn L2 write
//! ```
//!
//! L2 failures are misses. A fallback failure is returned to the caller
//! unchanged; deciding how to degrade is the caller's job.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::shared::{DynSharedCache, Namespace, fetch_bounded, spawn_set};
use crate::ttl_map::TtlMap;

/// Where a value was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Process-local map.
    Local,
    /// Shared cache.
    Shared,
    /// The fallback producer (origin or verifier).
    Origin,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "L1",
            Self::Shared => "L2",
            Self::Origin => "L3",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String encoding of values stored in the shared cache.
pub trait CacheCodec: Clone + Send + Sync + 'static {
    fn encode(&self) -> String;

    /// Parse a shared-cache value. `None` is treated as a miss.
    fn decode(raw: &str) -> Option<Self>;
}

impl CacheCodec for String {
    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }
}

/// A value plus the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit<V> {
    pub value: V,
    pub tier: Tier,
}

/// Per-tier lifetimes and the L2 wait budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub local_ttl: Duration,
    pub shared_ttl_secs: u64,
    pub shared_timeout: Duration,
}

/// One logical cache spread over L1 and L2.
pub struct TieredLookup<V> {
    namespace: Namespace,
    local: Arc<TtlMap<V>>,
    shared: DynSharedCache,
    policy: TierPolicy,
}

impl<V: CacheCodec> TieredLookup<V> {
    pub fn new(
        namespace: Namespace,
        local: Arc<TtlMap<V>>,
        shared: DynSharedCache,
        policy: TierPolicy,
    ) -> Self {
        Self {
            namespace,
            local,
            shared,
            policy,
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn local(&self) -> &Arc<TtlMap<V>> {
        &self.local
    }

    pub fn shared(&self) -> &DynSharedCache {
        &self.shared
    }

    pub fn policy(&self) -> TierPolicy {
        self.policy
    }

    /// The logical shared-cache key for `key`.
    pub fn shared_key(&self, key: &str) -> String {
        self.namespace.key(key)
    }

    /// L1 only.
    pub fn get_local(&self, key: &str) -> Option<V> {
        self.local.get(key)
    }

    /// L1 entry even if expired.
    pub fn get_stale(&self, key: &str) -> Option<V> {
        self.local.get_stale(key)
    }

    /// L2 only, without touching L1.
    pub async fn peek_shared(&self, key: &str) -> Option<V> {
        let shared_key = self.shared_key(key);
        let raw = fetch_bounded(&self.shared, &shared_key, self.policy.shared_timeout).await?;

        let value = V::decode(&raw);
        if value.is_none() {
            tracing::warn!(
                namespace = %self.namespace,
                key = %shared_key,
                "undecodable shared cache value, treating as miss"
            );
        }
        value
    }

    /// L2 only. A hit is copied into L1.
    pub async fn get_shared(&self, key: &str) -> Option<V> {
        let value = self.peek_shared(key).await?;
        self.put_local(key, value.clone());
        Some(value)
    }

    /// Write L1 only, with the local TTL.
    pub fn put_local(&self, key: &str, value: V) {
        self.local.put(key, value, self.policy.local_ttl);
    }

    /// L1 then L2.
    pub async fn get_cached(&self, key: &str) -> Option<Hit<V>> {
        if let Some(value) = self.get_local(key) {
            tracing::debug!(namespace = %self.namespace, key = %key, "cache hit (L1)");
            return Some(Hit {
                value,
                tier: Tier::Local,
            });
        }

        if let Some(value) = self.get_shared(key).await {
            tracing::debug!(namespace = %self.namespace, key = %key, "cache hit (L2)");
            return Some(Hit {
                value,
                tier: Tier::Shared,
            });
        }

        tracing::debug!(namespace = %self.namespace, key = %key, "cache miss");
        None
    }

    /// L1, then L2, then `fallback`.
    ///
    /// The fallback is not time-boxed here; callers wrap it in their own
    /// deadline. Only successful fallback values are stored.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fallback: F) -> Result<Hit<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get_cached(key).await {
            return Ok(hit);
        }

        let value = fallback().await?;
        self.store(key, value.clone());

        Ok(Hit {
            value,
            tier: Tier::Origin,
        })
    }

    /// Write L1 now and L2 in the background.
    pub fn store(&self, key: &str, value: V) {
        let encoded = value.encode();
        self.put_local(key, value);
        spawn_set(
            &self.shared,
            self.shared_key(key),
            encoded,
            self.policy.shared_ttl_secs,
        );
    }

    /// Drop `key` from both tiers. Returns `true` if L2 held it.
    ///
    /// Each shared-cache call is bounded by the shared timeout; a call that
    /// runs out of time counts as nothing deleted.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.local.remove(key);

        let shared_key = self.shared_key(key);
        let timeout = self.policy.shared_timeout;
        let exists = match tokio::time::timeout(timeout, self.shared.exists(&shared_key)).await {
            Ok(Ok(exists)) => exists,
            Ok(Err(e)) => {
                tracing::warn!(key = %shared_key, error = %e, "shared cache exists check failed");
                return false;
            }
            Err(_) => {
                tracing::warn!(key = %shared_key, "shared cache exists check timed out");
                return false;
            }
        };
        if !exists {
            tracing::debug!(key = %shared_key, "cache invalidated (L1)");
            return false;
        }

        match tokio::time::timeout(timeout, self.shared.delete(&shared_key)).await {
            Ok(Ok(())) => {
                tracing::debug!(key = %shared_key, "cache invalidated (L1+L2)");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(key = %shared_key, error = %e, "shared cache delete failed");
                false
            }
            Err(_) => {
                tracing::warn!(key = %shared_key, "shared cache delete timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{DynSharedCache, SharedCache, SharedCacheError};
    use crate::ttl_map::TtlMapConfig;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MapCache {
        values: DashMap<String, String>,
        gets: AtomicUsize,
        sets: AtomicUsize,
    }

    #[async_trait]
    impl SharedCache for MapCache {
        async fn get(&self, key: &str) -> Result<Option<String>, SharedCacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.values.get(key).map(|v| v.clone()))
        }
        async fn set(&self, key: &str, value: &str, _ttl: u64) -> Result<(), SharedCacheError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.values.insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn exists(&self, key: &str) -> Result<bool, SharedCacheError> {
            Ok(self.values.contains_key(key))
        }
        async fn delete(&self, key: &str) -> Result<(), SharedCacheError> {
            self.values.remove(key);
            Ok(())
        }
        async fn healthy(&self) -> bool {
            true
        }
    }

    /// Shared cache whose calls never complete.
    struct StalledCache {
        stall_exists: bool,
    }

    #[async_trait]
    impl SharedCache for StalledCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, SharedCacheError> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: u64) -> Result<(), SharedCacheError> {
            std::future::pending().await
        }
        async fn exists(&self, _key: &str) -> Result<bool, SharedCacheError> {
            if self.stall_exists {
                std::future::pending::<()>().await;
            }
            Ok(true)
        }
        async fn delete(&self, _key: &str) -> Result<(), SharedCacheError> {
            std::future::pending().await
        }
        async fn healthy(&self) -> bool {
            false
        }
    }

    fn lookup(shared: DynSharedCache) -> TieredLookup<String> {
        TieredLookup::new(
            Namespace::Session,
            Arc::new(TtlMap::new("session", TtlMapConfig::default())),
            shared,
            TierPolicy {
                local_ttl: Duration::from_secs(30),
                shared_ttl_secs: 120,
                shared_timeout: Duration::from_millis(300),
            },
        )
    }

    #[tokio::test]
    async fn test_shared_hit_is_promoted_to_local() {
        let shared = Arc::new(MapCache::default());
        shared.values.insert("session:S1".into(), "active".into());
        let lookup = lookup(shared.clone());

        let first = lookup
            .get_or_fetch("S1", || async { Err::<String, ()>(()) })
            .await
            .unwrap();
        assert_eq!(first.value, "active");
        assert_eq!(first.tier, Tier::Shared);

        let second = lookup
            .get_or_fetch("S1", || async { Err::<String, ()>(()) })
            .await
            .unwrap();
        assert_eq!(second.tier, Tier::Local);
        assert_eq!(shared.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_writes_both_tiers() {
        let shared = Arc::new(MapCache::default());
        let lookup = lookup(shared.clone());

        let hit = lookup
            .get_or_fetch("S2", || async { Ok::<_, ()>("ended".to_string()) })
            .await
            .unwrap();
        assert_eq!(hit.tier, Tier::Origin);
        assert_eq!(lookup.get_local("S2").as_deref(), Some("ended"));

        // The shared write is fire-and-forget.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(shared.sets.load(Ordering::SeqCst), 1);
        assert_eq!(
            shared.values.get("session:S2").map(|v| v.clone()).as_deref(),
            Some("ended")
        );
    }

    #[tokio::test]
    async fn test_fallback_failure_is_not_cached() {
        let shared = Arc::new(MapCache::default());
        let lookup = lookup(shared.clone());

        let result = lookup
            .get_or_fetch("S3", || async { Err::<String, &str>("boom") })
            .await;

        assert_eq!(result, Err("boom"));
        assert!(lookup.get_local("S3").is_none());
        assert_eq!(shared.sets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalidate_clears_both_tiers() {
        let shared = Arc::new(MapCache::default());
        let lookup = lookup(shared.clone());
        shared.values.insert("session:S4".into(), "live".into());
        lookup.local().put("S4", "live".to_string(), Duration::from_secs(30));

        assert!(lookup.invalidate("S4").await);
        assert!(lookup.get_local("S4").is_none());
        assert!(!shared.values.contains_key("session:S4"));
        assert!(!lookup.invalidate("S4").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_gives_up_on_stalled_shared_cache() {
        for stall_exists in [true, false] {
            let lookup = lookup(Arc::new(StalledCache { stall_exists }));
            lookup.local().put("S5", "live".to_string(), Duration::from_secs(30));

            let started = tokio::time::Instant::now();
            assert!(!lookup.invalidate("S5").await);
            assert!(started.elapsed() <= Duration::from_millis(300));
            assert!(lookup.get_local("S5").is_none());
        }
    }
}
