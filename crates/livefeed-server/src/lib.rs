pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod metrics;
pub mod observability;
pub mod origin;
pub mod server;

use std::sync::Arc;

pub use cache::{RedisSharedCache, TokenPipeline, TokenRejection, create_shared_cache};
pub use config::{
    AppConfig, CacheConfig, DatabaseConfig, RedisConfig, ServerConfig, TimeoutConfig,
};
pub use error::FeedError;
pub use feed::{FeedRequest, FeedService, Frame, FrameKind};
pub use observability::init_tracing;
pub use origin::{DynOriginStore, OriginStore, PgOriginStore, UnavailableOrigin};
pub use server::{AppState, LivefeedServer, ServerBuilder, StartupReport, build_app};

/// Create the origin store described by `config`.
///
/// Without a URL, or with one sqlx refuses to parse, every origin query fails
/// fast and requests degrade to cached or placeholder data. The pool connects
/// lazily, so an unreachable database does not block startup either.
pub fn create_origin_store(config: &DatabaseConfig) -> DynOriginStore {
    let Some(url) = config.url.as_deref() else {
        tracing::warn!("No database configured, origin queries will fail fast");
        return Arc::new(UnavailableOrigin);
    };

    match PgOriginStore::connect_lazy(config, url) {
        Ok(store) => {
            tracing::info!(pool_size = config.pool_size, "PostgreSQL origin store configured");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Invalid database configuration. Origin queries will fail fast."
            );
            Arc::new(UnavailableOrigin)
        }
    }
}
