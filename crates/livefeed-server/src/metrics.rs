//! Prometheus metrics and in-process request statistics.
//!
//! This module provides:
//! - Feed request metrics (count, latency, outcome)
//! - Cache metrics (hits by tier, misses, local entries)
//! - Degradation metrics (timeouts by stage, degraded responses, task defaults)
//! - [`FeedStats`], the cheap counters behind the health endpoints

use livefeed_core::{Tier, TtlMapStats};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Request metrics
    pub const FEED_REQUESTS_TOTAL: &str = "feed_requests_total";
    pub const FEED_REQUEST_DURATION_SECONDS: &str = "feed_request_duration_seconds";

    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const LOCAL_CACHE_ENTRIES: &str = "local_cache_entries";

    // Degradation metrics
    pub const FEED_TIMEOUTS_TOTAL: &str = "feed_timeouts_total";
    pub const FEED_DEGRADED_TOTAL: &str = "feed_degraded_total";
    pub const FEED_REJECTIONS_TOTAL: &str = "feed_rejections_total";
    pub const FETCH_TASK_DEFAULTS_TOTAL: &str = "fetch_task_defaults_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// This should be called once at server startup.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: we serve /metrics ourselves
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// Request Metrics
// =============================================================================

/// Record one finished request.
pub fn record_feed_request(endpoint: &'static str, outcome: &'static str, duration: Duration) {
    counter!(
        names::FEED_REQUESTS_TOTAL,
        "endpoint" => endpoint,
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        names::FEED_REQUEST_DURATION_SECONDS,
        "endpoint" => endpoint,
        "outcome" => outcome
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Cache Metrics
// =============================================================================

pub fn record_cache_hit(cache: &'static str, tier: Tier) {
    counter!(names::CACHE_HITS_TOTAL, "cache" => cache, "tier" => tier.as_str()).increment(1);
}

pub fn record_cache_miss(cache: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "cache" => cache).increment(1);
}

pub fn record_local_cache_entries(stats: &TtlMapStats) {
    gauge!(names::LOCAL_CACHE_ENTRIES, "cache" => stats.name).set(stats.size as f64);
}

// =============================================================================
// Degradation Metrics
// =============================================================================

/// A stage gave up waiting (`race`, `origin`, `fan_out`, `session_status`).
pub fn record_timeout(stage: &'static str) {
    counter!(names::FEED_TIMEOUTS_TOTAL, "stage" => stage).increment(1);
}

/// A best-effort response was served (`stale` or `placeholder`).
pub fn record_degraded(kind: &'static str) {
    counter!(names::FEED_DEGRADED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_rejection(reason: &'static str) {
    counter!(names::FEED_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// A fan-out task contributed its default instead of a result.
pub fn record_task_default(task: &'static str, cause: &'static str) {
    counter!(names::FETCH_TASK_DEFAULTS_TOTAL, "task" => task, "cause" => cause).increment(1);
}

// =============================================================================
// In-process statistics
// =============================================================================

/// Counters since process start, reported by the health endpoints.
#[derive(Debug)]
pub struct FeedStats {
    started: Instant,
    requests: AtomicU64,
    cache_hits: AtomicU64,
    timeouts: AtomicU64,
}

impl Default for FeedStats {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_requests = self.requests.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let timeouts = self.timeouts.load(Ordering::Relaxed);

        StatsSnapshot {
            uptime_ms: self.started.elapsed().as_millis() as u64,
            total_requests,
            cache_hits,
            timeouts,
            cache_hit_rate: percent(cache_hits, total_requests),
            timeout_rate: percent(timeouts, total_requests),
        }
    }
}

/// Rates are percentages rounded to one decimal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_ms: u64,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub timeouts: u64,
    pub cache_hit_rate: f64,
    pub timeout_rate: f64,
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 1000.0).round() / 10.0
}
