//! Process-local key/value map with per-entry expiry.
//!
//! This is the L1 tier of every tiered lookup. There is no background
//! cleanup task:
//!
//! - Reads always re-check expiry, so an expired entry that is still
//!   physically present is reported as absent.
//! - Once the map grows past its cleanup threshold, a read sweeps all expired
//!   entries with a small fixed probability.
//! - An insert that would exceed `max_size` first drops expired entries and,
//!   if the map is still full, drops roughly a fifth of the remaining entries
//!   in iteration order. This approximates LRU; it does not track recency.
//!
//! The map is safe to share between request handlers. Reads never lock.
//! Inserts take a short writer lock so that the capacity check, eviction and
//! insert happen as one step; the map never awaits, so no lock is held across
//! an await point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Probability that a read sweeps expired entries once past the threshold.
pub const DEFAULT_SWEEP_PROBABILITY: f64 = 0.1;

/// Default capacity of a local map.
pub const DEFAULT_MAX_SIZE: usize = 200;

/// Default size above which reads may trigger a sweep.
pub const DEFAULT_CLEANUP_THRESHOLD: usize = 150;

/// A full map of live entries sheds `len / EVICTION_DIVISOR` of them.
const EVICTION_DIVISOR: usize = 5;

/// A cached value with an absolute expiry instant.
///
/// Entries are never mutated; replacing a value inserts a new entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    /// Create an entry that expires `ttl` from now.
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Check if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Sizing and sweep policy for a [`TtlMap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlMapConfig {
    /// Hard cap on entries after any insert completes.
    pub max_size: usize,
    /// Reads only consider sweeping once the map holds more entries than this.
    pub cleanup_threshold: usize,
    /// Chance in `[0, 1]` that an eligible read performs a sweep.
    pub sweep_probability: f64,
}

impl Default for TtlMapConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            cleanup_threshold: DEFAULT_CLEANUP_THRESHOLD,
            sweep_probability: DEFAULT_SWEEP_PROBABILITY,
        }
    }
}

/// Bounded, lazily-expiring concurrent map keyed by string.
pub struct TtlMap<T> {
    name: &'static str,
    entries: DashMap<String, CacheEntry<T>>,
    /// Serializes inserts. Only inserts grow the map.
    write_lock: Mutex<()>,
    config: TtlMapConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<T: Clone> TtlMap<T> {
    /// Create an empty map. `name` labels logs and stats.
    pub fn new(name: &'static str, config: TtlMapConfig) -> Self {
        let config = TtlMapConfig {
            max_size: config.max_size.max(1),
            ..config
        };
        Self {
            name,
            entries: DashMap::new(),
            write_lock: Mutex::new(()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> TtlMapConfig {
        self.config
    }

    /// Get a live value.
    ///
    /// May sweep expired entries first (see module docs).
    pub fn get(&self, key: &str) -> Option<T> {
        self.maybe_sweep();

        let now = Instant::now();
        let found = self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value.clone());

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Get a value regardless of expiry.
    ///
    /// Used only by degradation paths that prefer old data over nothing.
    pub fn get_stale(&self, key: &str) -> Option<T> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert a value that expires after `ttl`.
    ///
    /// When this returns the map holds at most `max_size` entries, whatever
    /// other writers are doing.
    pub fn put(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry::new(value, ttl);

        let _guard = self.write_lock.lock();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_size {
            self.make_room();
        }
        self.entries.insert(key, entry);
    }

    /// Remove an entry. Returns `true` if one was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> TtlMapStats {
        TtlMapStats {
            name: self.name,
            size: self.entries.len(),
            max_size: self.config.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn maybe_sweep(&self) {
        if self.entries.len() <= self.config.cleanup_threshold {
            return;
        }
        if rand::random::<f64>() >= self.config.sweep_probability {
            return;
        }
        let removed = self.remove_expired();
        tracing::debug!(
            cache = self.name,
            removed,
            size = self.entries.len(),
            "lazy sweep removed expired entries"
        );
    }

    fn make_room(&self) {
        self.remove_expired();

        let len = self.entries.len();
        if len < self.config.max_size {
            return;
        }

        // Drop at least enough to fit one more entry, even for tiny maps.
        let target = (len / EVICTION_DIVISOR).max(len + 1 - self.config.max_size);
        let victims: Vec<String> = self
            .entries
            .iter()
            .take(target)
            .map(|entry| entry.key().clone())
            .collect();

        for key in &victims {
            self.entries.remove(key);
        }
        self.evictions
            .fetch_add(victims.len() as u64, Ordering::Relaxed);

        tracing::debug!(
            cache = self.name,
            evicted = victims.len(),
            size = self.entries.len(),
            "local cache at capacity, evicted entries"
        );
    }
}

/// Point-in-time counters for one local map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TtlMapStats {
    pub name: &'static str,
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed by sweeps or capacity eviction.
    pub evictions: u64,
}

impl TtlMapStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
