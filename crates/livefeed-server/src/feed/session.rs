//! Session status endpoint and cache invalidation.

use std::sync::Arc;

use livefeed_core::Tier;
use tokio::time::Instant;

use super::{FeedService, Frame, non_blank, outcome};
use crate::error::FeedError;
use crate::metrics;

/// The session does not exist.
pub const UNKNOWN_STATUS: &str = "unknown";
/// The origin query failed.
pub const UNAVAILABLE_STATUS: &str = "unavailable";
/// Nothing arrived in time.
pub const LOADING_STATUS: &str = "loading";

/// Non-cacheable results of a status lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusMiss {
    Unknown,
    Unavailable,
    TimedOut,
}

impl FeedService {
    /// Serve the status of one session.
    pub async fn session_status(&self, session_id: Option<&str>) -> Result<Frame, FeedError> {
        let started = Instant::now();
        self.stats.record_request();

        let result = self.session_status_inner(session_id).await;

        metrics::record_feed_request("session_status", outcome(&result), started.elapsed());
        result
    }

    async fn session_status_inner(&self, session_id: Option<&str>) -> Result<Frame, FeedError> {
        let session_id = non_blank(session_id).ok_or(FeedError::MissingParameter("session_id"))?;

        let lookup = self
            .statuses
            .get_or_fetch(session_id, || self.load_session_status(session_id));

        match lookup.await {
            Ok(hit) => {
                if hit.tier == Tier::Origin {
                    metrics::record_cache_miss("session");
                } else {
                    self.record_hit("session", hit.tier);
                }
                Ok(Frame::data(hit.value))
            }
            Err(StatusMiss::Unknown) => Ok(Frame::data(UNKNOWN_STATUS)),
            Err(StatusMiss::Unavailable) => Ok(Frame::data(UNAVAILABLE_STATUS)),
            Err(StatusMiss::TimedOut) => {
                self.stats.record_timeout();
                metrics::record_timeout("session_status");

                match self.statuses.get_stale(session_id) {
                    Some(status) => {
                        metrics::record_degraded("stale");
                        Ok(Frame::stale(status))
                    }
                    None => {
                        metrics::record_degraded("placeholder");
                        Ok(Frame::placeholder_with(LOADING_STATUS))
                    }
                }
            }
        }
    }

    async fn load_session_status(&self, session_id: &str) -> Result<String, StatusMiss> {
        let origin = Arc::clone(&self.origin);
        let id = session_id.to_string();
        let handle = self
            .fetcher
            .pool()
            .spawn(async move { origin.session_status(&id).await })
            .map_err(|e| {
                tracing::warn!(error = %e, "session status query not submitted");
                StatusMiss::Unavailable
            })?;

        match tokio::time::timeout(self.timeouts.query(), handle).await {
            Ok(Ok(Ok(Some(status)))) => Ok(status),
            Ok(Ok(Ok(None))) => {
                tracing::debug!(session_id, "session not found");
                Err(StatusMiss::Unknown)
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(session_id, error = %e, "session status query failed");
                Err(StatusMiss::Unavailable)
            }
            Ok(Err(e)) => {
                tracing::error!(session_id, error = %e, "session status task failed");
                Err(StatusMiss::Unavailable)
            }
            Err(_) => {
                tracing::warn!(
                    session_id,
                    timeout_ms = self.timeouts.query_ms,
                    "session status query timed out"
                );
                Err(StatusMiss::TimedOut)
            }
        }
    }

    /// Drop a cached feed response from both tiers. Returns `true` if the
    /// shared cache held it.
    pub async fn invalidate_feed(&self, kind: &str, type_id: &str) -> bool {
        self.responses
            .invalidate(&format!("{kind}:{type_id}"))
            .await
    }

    /// Drop a cached session status from both tiers.
    pub async fn invalidate_session_status(&self, session_id: &str) -> bool {
        self.statuses.invalidate(session_id).await
    }
}
