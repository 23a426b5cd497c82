//! PostgreSQL origin store.

use std::time::Duration;

use async_trait::async_trait;
use sqlx_core::pool::PoolOptions;
use sqlx_core::query::query;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgRow, Postgres};

use super::{Comment, ConnectionStats, OriginError, OriginResult, OriginStore, Poll};
use crate::config::DatabaseConfig;

const COMMENTS_SQL: &str = r#"
    SELECT
        q.knwlg_session_qna_id::BIGINT AS knwlg_session_qna_id,
        q.user_master_id::BIGINT AS user_master_id,
        ud.first_name,
        ud.last_name,
        ud.profile_image,
        q.comment,
        q.comment_approve_status::INTEGER AS comment_approve_status,
        q.status::TEXT AS status,
        q.type_id::TEXT AS type_id,
        q.type
    FROM knwlg_session_qna q
    LEFT JOIN user_detail ud ON ud.user_master_id = q.user_master_id
    WHERE (q.user_master_id = $1 OR q.comment_approve_status = 1)
      AND q.type_id::TEXT = $2
      AND q.type = $3
    ORDER BY q.knwlg_session_qna_id ASC
"#;

const POLLS_SQL: &str = r#"
    SELECT
        s.survey_id::BIGINT AS survey_id,
        s.is_show::INTEGER AS is_show,
        s.is_answer_show::INTEGER AS is_answer_show,
        COALESCE(sua.id, 0)::BIGINT AS is_answered
    FROM cme_streaming_to_survey s
    LEFT JOIN cme_survey_user_answer sua
        ON sua.survey_id = s.survey_id AND sua.user_master_id = $2
    WHERE s.session_id::TEXT = $1
"#;

const SESSION_STATUS_SQL: &str = "SELECT session_status::TEXT AS session_status FROM knwlg_sessions_V1 WHERE session_id::TEXT = $1";

/// Origin store over a sqlx Postgres pool.
#[derive(Debug, Clone)]
pub struct PgOriginStore {
    pool: PgPool,
}

impl PgOriginStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool that connects on first use, so startup never blocks on
    /// the database.
    pub fn connect_lazy(config: &DatabaseConfig, url: &str) -> OriginResult<Self> {
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
            .test_before_acquire(false)
            .connect_lazy(url)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn require(name: &str, value: &str) -> OriginResult<()> {
    if value.trim().is_empty() {
        return Err(OriginError::InvalidParameter(format!("{name} is required")));
    }
    Ok(())
}

fn row_to_comment(row: &PgRow) -> Result<Comment, sqlx_core::error::Error> {
    Ok(Comment {
        id: row.try_get("knwlg_session_qna_id")?,
        user_master_id: row.try_get("user_master_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        profile_image: row.try_get("profile_image")?,
        comment: row.try_get("comment")?,
        comment_approve_status: row.try_get("comment_approve_status")?,
        status: row.try_get("status")?,
        type_id: row.try_get("type_id")?,
        kind: row.try_get("type")?,
    })
}

fn row_to_poll(row: &PgRow) -> Result<Poll, sqlx_core::error::Error> {
    Ok(Poll {
        survey_id: row.try_get("survey_id")?,
        is_show: row.try_get("is_show")?,
        is_answer_show: row.try_get("is_answer_show")?,
        is_answered: row.try_get("is_answered")?,
    })
}

#[async_trait]
impl OriginStore for PgOriginStore {
    async fn comments(
        &self,
        viewer: i64,
        type_id: &str,
        kind: &str,
    ) -> OriginResult<Vec<Comment>> {
        require("type_id", type_id)?;
        require("type", kind)?;

        let rows = query(COMMENTS_SQL)
            .bind(viewer)
            .bind(type_id)
            .bind(kind)
            .fetch_all(&self.pool)
            .await?;

        let comments = rows
            .iter()
            .map(row_to_comment)
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(type_id, kind, count = comments.len(), "comments loaded");
        Ok(comments)
    }

    async fn polls(&self, session_id: &str, viewer: i64) -> OriginResult<Vec<Poll>> {
        require("session_id", session_id)?;

        let rows = query(POLLS_SQL)
            .bind(session_id)
            .bind(viewer)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_poll).collect::<Result<Vec<_>, _>>()?)
    }

    async fn session_status(&self, session_id: &str) -> OriginResult<Option<String>> {
        require("session_id", session_id)?;

        let row = query(SESSION_STATUS_SQL)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_get::<Option<String>, _>("session_status")?),
            None => Ok(None),
        }
    }

    async fn healthy(&self) -> bool {
        query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    fn connections(&self) -> Option<ConnectionStats> {
        Some(ConnectionStats {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
        })
    }
}
