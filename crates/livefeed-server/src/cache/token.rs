//! Token validation pipeline.
//!
//! A tiered lookup over the `token:` namespace whose fallback is signature
//! verification on the token worker pool:
//!
//! ```text
//! resolve(token) → L1 → L2 (300ms) → verify on token pool (1500ms)
//!                  └──────────── whole pipeline: 2000ms ───────────┘
//! ```
//!
//! Only successful verifications are stored. Keys are SHA-256 hashes of the
//! raw token, never the token itself.

use std::sync::Arc;
use std::time::Duration;

use livefeed_auth::{CredentialVerifier, JwtError, PrincipalId, credential_key};
use livefeed_core::{Hit, Tier, TieredLookup, WorkerPool};

use crate::metrics;

/// Why a token did not resolve to a principal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("access token missing")]
    Missing,

    #[error("access token invalid: {0}")]
    Invalid(JwtError),

    #[error("token validation timed out")]
    TimedOut,

    #[error("token validation unavailable")]
    Unavailable,
}

impl TokenRejection {
    /// Label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Invalid(e) => e.reason(),
            Self::TimedOut => "timeout",
            Self::Unavailable => "unavailable",
        }
    }
}

pub struct TokenPipeline {
    lookup: TieredLookup<PrincipalId>,
    verifier: Arc<dyn CredentialVerifier>,
    pool: WorkerPool,
    verify_timeout: Duration,
    total_timeout: Duration,
}

impl TokenPipeline {
    pub fn new(
        lookup: TieredLookup<PrincipalId>,
        verifier: Arc<dyn CredentialVerifier>,
        pool: WorkerPool,
        verify_timeout: Duration,
        total_timeout: Duration,
    ) -> Self {
        Self {
            lookup,
            verifier,
            pool,
            verify_timeout,
            total_timeout,
        }
    }

    pub fn lookup(&self) -> &TieredLookup<PrincipalId> {
        &self.lookup
    }

    /// Resolve `token` to a principal within the pipeline's total timeout.
    pub async fn resolve(&self, token: &str) -> Result<Hit<PrincipalId>, TokenRejection> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenRejection::Missing);
        }

        let key = credential_key(token);
        let lookup = self
            .lookup
            .get_or_fetch(&key, || self.verify_on_pool(token));

        let result = match tokio::time::timeout(self.total_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(TokenRejection::TimedOut),
        };

        match &result {
            Ok(hit) => {
                if hit.tier != Tier::Origin {
                    metrics::record_cache_hit("token", hit.tier);
                }
                tracing::debug!(tier = %hit.tier, principal = %hit.value, "token resolved");
            }
            Err(rejection) => tracing::debug!(reason = rejection.reason(), "token rejected"),
        }
        result
    }

    /// Fallback of the lookup: runs only after both cache tiers missed.
    async fn verify_on_pool(&self, token: &str) -> Result<PrincipalId, TokenRejection> {
        metrics::record_cache_miss("token");

        let verifier = Arc::clone(&self.verifier);
        let token = token.to_string();
        let handle = self
            .pool
            .spawn_blocking(move || verifier.verify(&token))
            .map_err(|_| TokenRejection::Unavailable)?;

        match tokio::time::timeout(self.verify_timeout, handle).await {
            Ok(Ok(Ok(Ok(principal)))) => Ok(principal),
            Ok(Ok(Ok(Err(e)))) => {
                if !e.is_credential_error() {
                    tracing::error!(error = %e, "token verifier is misconfigured");
                }
                Err(TokenRejection::Invalid(e))
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "token verification task failed");
                Err(TokenRejection::Unavailable)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "token verification task failed");
                Err(TokenRejection::Unavailable)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.verify_timeout.as_millis() as u64,
                    "token verification timed out"
                );
                Err(TokenRejection::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::metrics::{
        Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use livefeed_core::{Namespace, NoopSharedCache, TierPolicy, TtlMap, TtlMapConfig};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Accepts tokens of the form `user-<id>`.
    #[derive(Default)]
    struct PrefixVerifier {
        calls: AtomicUsize,
    }

    impl CredentialVerifier for PrefixVerifier {
        fn verify(&self, token: &str) -> Result<PrincipalId, JwtError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            token
                .strip_prefix("user-")
                .and_then(|id| id.parse().ok())
                .ok_or(JwtError::InvalidSignature)
        }
    }

    fn pipeline(verifier: Arc<PrefixVerifier>) -> TokenPipeline {
        let lookup = TieredLookup::new(
            Namespace::Token,
            Arc::new(TtlMap::new("token", TtlMapConfig::default())),
            Arc::new(NoopSharedCache),
            TierPolicy {
                local_ttl: Duration::from_secs(300),
                shared_ttl_secs: 1800,
                shared_timeout: Duration::from_millis(300),
            },
        );
        TokenPipeline::new(
            lookup,
            verifier,
            WorkerPool::new("token", 2),
            Duration::from_millis(1500),
            Duration::from_millis(2000),
        )
    }

    #[tokio::test]
    async fn test_valid_token_is_memoized() {
        let verifier = Arc::new(PrefixVerifier::default());
        let pipeline = pipeline(Arc::clone(&verifier));

        let first = pipeline.resolve("user-879").await.unwrap();
        assert_eq!(first.value, PrincipalId::new(879));
        assert_eq!(first.tier, Tier::Origin);

        let second = pipeline.resolve("user-879").await.unwrap();
        assert_eq!(second.value, PrincipalId::new(879));
        assert_eq!(second.tier, Tier::Local);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_token_is_never_cached() {
        let verifier = Arc::new(PrefixVerifier::default());
        let pipeline = pipeline(Arc::clone(&verifier));

        for _ in 0..2 {
            let err = pipeline.resolve("forged").await.unwrap_err();
            assert_eq!(err, TokenRejection::Invalid(JwtError::InvalidSignature));
        }

        assert_eq!(verifier.calls.load(Ordering::SeqCst), 2);
        assert!(pipeline.lookup().local().is_empty());
        assert!(pipeline.lookup().get_stale(&credential_key("forged")).is_none());
    }

    #[tokio::test]
    async fn test_blank_token_is_missing() {
        let pipeline = pipeline(Arc::new(PrefixVerifier::default()));
        assert_eq!(pipeline.resolve("  ").await.unwrap_err(), TokenRejection::Missing);
    }

    struct Tally(Arc<AtomicU64>);

    impl CounterFn for Tally {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }

        fn absolute(&self, value: u64) {
            self.0.fetch_max(value, Ordering::SeqCst);
        }
    }

    /// Counts `cache_misses_total{cache="token"}` and ignores everything else.
    #[derive(Default)]
    struct TokenMisses {
        count: Arc<AtomicU64>,
    }

    impl Recorder for TokenMisses {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let token_miss = key.name() == "cache_misses_total"
                && key.labels().any(|l| l.key() == "cache" && l.value() == "token");
            if token_miss {
                Counter::from_arc(Arc::new(Tally(Arc::clone(&self.count))))
            } else {
                Counter::noop()
            }
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_miss_counted_only_when_tiers_miss() {
        let recorder = TokenMisses::default();
        let misses = Arc::clone(&recorder.count);

        ::metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let pipeline = pipeline(Arc::new(PrefixVerifier::default()));

                pipeline.resolve("  ").await.unwrap_err();
                assert_eq!(misses.load(Ordering::SeqCst), 0);

                pipeline.resolve("forged").await.unwrap_err();
                assert_eq!(misses.load(Ordering::SeqCst), 1);

                pipeline.resolve("user-1").await.unwrap();
                pipeline.resolve("user-1").await.unwrap();
            });
        });

        assert_eq!(misses.load(Ordering::SeqCst), 2);
    }
}
