//! Origin store: the system of record behind the caches.

pub mod models;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

pub use models::{Comment, FeedPayload, PLACEHOLDER_PAYLOAD, Poll};
pub use postgres::PgOriginStore;

#[derive(Debug, thiserror::Error)]
pub enum OriginError {
    #[error("database error: {0}")]
    Database(#[from] sqlx_core::error::Error),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("origin unavailable: {0}")]
    Unavailable(String),
}

pub type OriginResult<T> = Result<T, OriginError>;

/// Connection pool occupancy, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub size: u32,
    pub idle: u32,
}

/// Read-only queries the feed needs.
#[async_trait]
pub trait OriginStore: Send + Sync {
    /// Comments of one feed visible to `viewer`: all approved comments plus
    /// the viewer's own, oldest first.
    async fn comments(&self, viewer: i64, type_id: &str, kind: &str)
    -> OriginResult<Vec<Comment>>;

    /// Polls attached to a session with the viewer's answer state.
    async fn polls(&self, session_id: &str, viewer: i64) -> OriginResult<Vec<Poll>>;

    /// `None` when the session does not exist.
    async fn session_status(&self, session_id: &str) -> OriginResult<Option<String>>;

    async fn healthy(&self) -> bool;

    fn connections(&self) -> Option<ConnectionStats> {
        None
    }
}

pub type DynOriginStore = Arc<dyn OriginStore>;

/// Stand-in when no database is configured. Every query fails fast, so
/// requests degrade to cached or placeholder data.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableOrigin;

#[async_trait]
impl OriginStore for UnavailableOrigin {
    async fn comments(&self, _: i64, _: &str, _: &str) -> OriginResult<Vec<Comment>> {
        Err(OriginError::Unavailable("no database configured".into()))
    }

    async fn polls(&self, _: &str, _: i64) -> OriginResult<Vec<Poll>> {
        Err(OriginError::Unavailable("no database configured".into()))
    }

    async fn session_status(&self, _: &str) -> OriginResult<Option<String>> {
        Err(OriginError::Unavailable("no database configured".into()))
    }

    async fn healthy(&self) -> bool {
        false
    }
}
