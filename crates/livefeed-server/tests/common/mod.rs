//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use livefeed_auth::{CredentialVerifier, JwtError, JwtVerifier, PrincipalId};
use livefeed_core::{SharedCache, SharedCacheError, WorkerPool};
use livefeed_server::config::AppConfig;
use livefeed_server::feed::FeedService;
use livefeed_server::metrics::FeedStats;
use livefeed_server::origin::{
    Comment, ConnectionStats, OriginError, OriginResult, OriginStore, Poll,
};
use serde_json::json;

pub const SECRET: &str = "livefeed-integration-secret-0123456789";

/// Default configuration with a usable secret.
pub fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.jwt_secret = SECRET.to_string();
    cfg
}

/// Tight deadlines so timeout paths finish quickly in real time.
pub fn fast_config() -> AppConfig {
    let mut cfg = config();
    cfg.timeouts.shared_cache_ms = 100;
    cfg.timeouts.race_ms = 150;
    cfg.timeouts.origin_ms = 400;
    cfg.timeouts.fan_out_ms = 200;
    cfg.timeouts.query_ms = 200;
    cfg
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn token_with_exp(user: i64, exp: u64) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &json!({ "userdetail": { "user_master_id": user }, "exp": exp }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn token_for(user: i64) -> String {
    token_with_exp(user, now_secs() + 3600)
}

pub fn expired_token(user: i64) -> String {
    token_with_exp(user, now_secs() - 3600)
}

/// In-memory shared cache with call counters, optional per-key read delays
/// and a switch that makes every call fail.
#[derive(Default)]
pub struct MockSharedCache {
    pub values: DashMap<String, String>,
    pub delays: DashMap<String, Duration>,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub set_keys: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl MockSharedCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unreachable() -> Arc<Self> {
        let cache = Self::default();
        cache.fail.store(true, Ordering::SeqCst);
        Arc::new(cache)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn attempted_set(&self, key: &str) -> bool {
        self.set_keys.lock().unwrap().iter().any(|k| k == key)
    }

    fn check(&self) -> Result<(), SharedCacheError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SharedCacheError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedCache for MockSharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, SharedCacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.get(key).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<(), SharedCacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.set_keys.lock().unwrap().push(key.to_string());
        self.check()?;
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, SharedCacheError> {
        self.check()?;
        Ok(self.values.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), SharedCacheError> {
        self.check()?;
        self.values.remove(key);
        Ok(())
    }

    async fn healthy(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }
}

/// Origin store returning fixed data after an optional delay.
pub struct MockOrigin {
    pub comments: Vec<Comment>,
    pub polls: Vec<Poll>,
    pub status: Option<String>,
    pub delay: Duration,
    /// Extra delay for the polls query only.
    pub slow_polls: Duration,
    /// Every query waits forever.
    pub hang: AtomicBool,
    /// Every query fails.
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl MockOrigin {
    pub fn with_status(status: Option<&str>) -> Self {
        Self {
            comments: Vec::new(),
            polls: Vec::new(),
            status: status.map(Into::into),
            delay: Duration::ZERO,
            slow_polls: Duration::ZERO,
            hang: AtomicBool::new(false),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn hanging() -> Arc<Self> {
        let origin = Self::with_status(Some("live"));
        origin.hang.store(true, Ordering::SeqCst);
        Arc::new(origin)
    }

    pub fn failing() -> Arc<Self> {
        let origin = Self::with_status(Some("live"));
        origin.fail.store(true, Ordering::SeqCst);
        Arc::new(origin)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond<T>(&self, value: T) -> OriginResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(OriginError::Unavailable("mock origin down".into()));
        }
        Ok(value)
    }
}

#[async_trait]
impl OriginStore for MockOrigin {
    async fn comments(
        &self,
        _viewer: i64,
        _type_id: &str,
        _kind: &str,
    ) -> OriginResult<Vec<Comment>> {
        self.respond(self.comments.clone()).await
    }

    async fn polls(&self, _session_id: &str, _viewer: i64) -> OriginResult<Vec<Poll>> {
        if !self.slow_polls.is_zero() {
            tokio::time::sleep(self.slow_polls).await;
        }
        self.respond(self.polls.clone()).await
    }

    async fn session_status(&self, _session_id: &str) -> OriginResult<Option<String>> {
        self.respond(self.status.clone()).await
    }

    async fn healthy(&self) -> bool {
        !self.fail.load(Ordering::SeqCst) && !self.hang.load(Ordering::SeqCst)
    }

    fn connections(&self) -> Option<ConnectionStats> {
        Some(ConnectionStats { size: 4, idle: 3 })
    }
}

pub fn comment(id: i64, user: i64, text: &str) -> Comment {
    Comment {
        id,
        user_master_id: user,
        first_name: Some("Test".into()),
        last_name: None,
        profile_image: None,
        comment: Some(text.into()),
        comment_approve_status: 1,
        status: Some("1".into()),
        type_id: "S1".into(),
        kind: "session".into(),
    }
}

pub fn service(
    cfg: &AppConfig,
    shared: Arc<MockSharedCache>,
    origin: Arc<MockOrigin>,
) -> FeedService {
    let verifier = JwtVerifier::new(cfg.auth.jwt_secret.as_bytes()).unwrap();
    service_with_verifier(cfg, shared, origin, Arc::new(verifier))
}

pub fn service_with_verifier(
    cfg: &AppConfig,
    shared: Arc<MockSharedCache>,
    origin: Arc<MockOrigin>,
    verifier: Arc<dyn CredentialVerifier>,
) -> FeedService {
    FeedService::from_config(
        cfg,
        shared,
        origin,
        verifier,
        WorkerPool::new("io", cfg.pools.io_workers),
        WorkerPool::new("token", cfg.pools.token_workers),
        Arc::new(FeedStats::new()),
    )
}

/// Verifier that blocks its worker for `delay` before accepting any token.
pub struct SlowVerifier {
    pub delay: Duration,
}

impl CredentialVerifier for SlowVerifier {
    fn verify(&self, _token: &str) -> Result<PrincipalId, JwtError> {
        std::thread::sleep(self.delay);
        Ok(PrincipalId::new(879))
    }
}
