use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use livefeed_auth::{CredentialVerifier, JwtVerifier};
use livefeed_core::{DynSharedCache, WorkerPool};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::AppConfig,
    create_origin_store, create_shared_cache,
    feed::FeedService,
    handlers,
    metrics::FeedStats,
    origin::DynOriginStore,
};

/// Everything the handlers share. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<FeedService>,
    pub stats: Arc<FeedStats>,
    pub shared: DynSharedCache,
    pub origin: DynOriginStore,
    pub io_pool: WorkerPool,
    pub token_pool: WorkerPool,
}

impl AppState {
    /// Assemble state from already-built collaborators.
    pub fn new(
        cfg: &AppConfig,
        shared: DynSharedCache,
        origin: DynOriginStore,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let stats = Arc::new(FeedStats::new());
        let io_pool = WorkerPool::new("io", cfg.pools.io_workers);
        let token_pool = WorkerPool::new("token", cfg.pools.token_workers);

        let feed = FeedService::from_config(
            cfg,
            Arc::clone(&shared),
            Arc::clone(&origin),
            verifier,
            io_pool.clone(),
            token_pool.clone(),
            Arc::clone(&stats),
        );

        Self {
            feed: Arc::new(feed),
            stats,
            shared,
            origin,
            io_pool,
            token_pool,
        }
    }

    /// Connect to Redis and PostgreSQL as configured. Neither being reachable
    /// stops startup; only an unusable JWT secret does.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let verifier = JwtVerifier::new(cfg.auth.jwt_secret.as_bytes())?;
        let shared = create_shared_cache(&cfg.redis).await;
        let origin = create_origin_store(&cfg.database);

        Ok(Self::new(cfg, shared, origin, Arc::new(verifier)))
    }

    /// Check each backing service once. A failed check is not fatal: the
    /// feed serves from whatever tiers are left.
    pub async fn startup_report(&self) -> StartupReport {
        let (shared_cache, database) = tokio::join!(
            check(self.shared.healthy()),
            check(self.origin.healthy())
        );

        StartupReport {
            shared_cache,
            database,
            io_workers: self.io_pool.workers(),
            token_workers: self.token_pool.workers(),
        }
    }

    /// Stop admitting pool work and wait for in-flight tasks.
    pub async fn drain(&self, grace: Duration) {
        let (io, token) = tokio::join!(
            self.io_pool.shutdown(grace),
            self.token_pool.shutdown(grace)
        );
        if io && token {
            tracing::info!("worker pools drained");
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        // Stream endpoints
        .route("/api/sse/stream", get(handlers::stream))
        .route("/api/sse/session-status", get(handlers::session_status))
        // Health and metrics
        .route("/health", get(handlers::health))
        .route("/health/cache", get(handlers::health_cache))
        .route("/health/database", get(handlers::health_database))
        .route("/health/performance", get(handlers::health_performance))
        .route("/metrics", get(handlers::metrics))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = tracing::field::Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::debug!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .with_state(state)
}

const STARTUP_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

async fn check(healthy: impl Future<Output = bool>) -> bool {
    tokio::time::timeout(STARTUP_CHECK_TIMEOUT, healthy)
        .await
        .unwrap_or(false)
}

/// What the server found when it came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    pub shared_cache: bool,
    pub database: bool,
    pub io_workers: usize,
    pub token_workers: usize,
}

impl StartupReport {
    /// Requests will degrade more often than usual.
    pub fn degraded(&self) -> bool {
        !self.shared_cache || !self.database
    }

    pub fn log(&self) {
        if self.degraded() {
            tracing::warn!(
                shared_cache = self.shared_cache,
                database = self.database,
                "starting with a backend unavailable, frames will fall back to cached data"
            );
        }
        tracing::info!(
            io_workers = self.io_workers,
            token_workers = self.token_workers,
            shared_cache = self.shared_cache,
            database = self.database,
            "livefeed ready"
        );
    }
}

pub struct LivefeedServer {
    addr: SocketAddr,
    app: Router,
    state: AppState,
    shutdown_grace: Duration,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<LivefeedServer> {
        let state = AppState::from_config(&self.config).await?;
        let app = build_app(state.clone());

        Ok(LivefeedServer {
            addr: self.addr,
            app,
            state,
            shutdown_grace: self.config.shutdown_grace(),
        })
    }
}

impl LivefeedServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.state.drain(self.shutdown_grace).await;

        let stats = self.state.stats.snapshot();
        tracing::info!(
            uptime_ms = stats.uptime_ms,
            total_requests = stats.total_requests,
            cache_hit_rate = stats.cache_hit_rate,
            timeout_rate = stats.timeout_rate,
            "server stopped"
        );
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
