//! Request orchestration for the feed stream.
//!
//! ```text
//! CHECK_LOCAL ──hit──────────────────────────────────────────────▶ Data
//!     │ miss
//! RACE_TOKEN_AND_REMOTE ──rejected──────────────────────────────▶ Rejected
//!     │ remote hit ──▶ write L1 ─────────────────────────────────▶ Data
//!     │ remote miss or race timeout
//! FETCH_ORIGIN ──any task done──▶ write L1 + L2 ────────────────▶ Data
//!     │ deadline, or nothing done in time
//! DEGRADE ──stale L1 entry──▶ Stale, otherwise ──────────────────▶ Placeholder
//! ```
//!
//! Every request ends in exactly one frame or one rejection.

mod frame;
mod session;

pub use frame::{Frame, FrameKind};
pub use session::{LOADING_STATUS, UNAVAILABLE_STATUS, UNKNOWN_STATUS};

use std::sync::Arc;

use livefeed_auth::{CredentialVerifier, PrincipalId};
use livefeed_core::{
    DynSharedCache, FetchOrchestrator, FetchTask, Namespace, Tier, TieredLookup, TtlMap,
    TtlMapStats, WorkerPool,
};
use serde::Deserialize;
use tokio::time::Instant;

use crate::cache::{TokenPipeline, TokenRejection};
use crate::config::{AppConfig, TimeoutConfig, tier_policy};
use crate::error::FeedError;
use crate::metrics::{self, FeedStats};
use crate::origin::{Comment, DynOriginStore, FeedPayload, Poll};

/// Request kind that fans out to comments, polls and session status.
pub const SESSION_KIND: &str = "session";

const COMMENTS_TASK: &str = "comments";
const POLLS_TASK: &str = "polls";
const STATUS_TASK: &str = "session_status";

/// Query parameters of the stream endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedRequest {
    pub token: Option<String>,
    pub type_id: Option<String>,
    /// Used as `type_id` when that is absent.
    pub session_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl FeedRequest {
    pub fn key(&self) -> Result<FeedKey, FeedError> {
        let type_id = non_blank(self.type_id.as_deref())
            .or_else(|| non_blank(self.session_id.as_deref()))
            .ok_or(FeedError::MissingParameter("type_id"))?;
        let kind = non_blank(self.kind.as_deref()).unwrap_or(SESSION_KIND);

        Ok(FeedKey {
            type_id: type_id.to_string(),
            kind: kind.to_string(),
        })
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Identity of one feed: `kind` plus `type_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedKey {
    pub type_id: String,
    pub kind: String,
}

impl FeedKey {
    /// Key of the response cache, shared by every viewer of the feed.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.kind, self.type_id)
    }

    pub fn is_session(&self) -> bool {
        self.kind == SESSION_KIND
    }
}

#[derive(Debug, Clone)]
enum Part {
    Comments(Vec<Comment>),
    Polls(Vec<Poll>),
    Status(String),
}

struct OriginFetch {
    payload: FeedPayload,
    /// Every task produced its own value.
    complete: bool,
    /// Nothing completed and at least one task ran out of time.
    starved: bool,
}

pub struct FeedService {
    responses: Arc<TieredLookup<String>>,
    statuses: TieredLookup<String>,
    tokens: Arc<TokenPipeline>,
    origin: DynOriginStore,
    fetcher: FetchOrchestrator,
    timeouts: TimeoutConfig,
    stats: Arc<FeedStats>,
}

impl FeedService {
    pub fn new(
        responses: TieredLookup<String>,
        statuses: TieredLookup<String>,
        tokens: TokenPipeline,
        origin: DynOriginStore,
        io_pool: WorkerPool,
        timeouts: TimeoutConfig,
        stats: Arc<FeedStats>,
    ) -> Self {
        Self {
            responses: Arc::new(responses),
            statuses,
            tokens: Arc::new(tokens),
            origin,
            fetcher: FetchOrchestrator::new(io_pool),
            timeouts,
            stats,
        }
    }

    /// Wire the three logical caches over one shared cache.
    pub fn from_config(
        config: &AppConfig,
        shared: DynSharedCache,
        origin: DynOriginStore,
        verifier: Arc<dyn CredentialVerifier>,
        io_pool: WorkerPool,
        token_pool: WorkerPool,
        stats: Arc<FeedStats>,
    ) -> Self {
        let cache = &config.cache;
        let timeouts = &config.timeouts;
        let map_config = cache.ttl_map();

        let tokens = TokenPipeline::new(
            TieredLookup::new(
                Namespace::Token,
                Arc::new(TtlMap::new("token", map_config)),
                Arc::clone(&shared),
                tier_policy(cache.token_local_ttl_secs, cache.token_shared_ttl_secs, timeouts),
            ),
            verifier,
            token_pool,
            timeouts.verify(),
            timeouts.token(),
        );
        let responses = TieredLookup::new(
            Namespace::Data,
            Arc::new(TtlMap::new("data", map_config)),
            Arc::clone(&shared),
            tier_policy(cache.data_local_ttl_secs, cache.data_shared_ttl_secs, timeouts),
        );
        let statuses = TieredLookup::new(
            Namespace::Session,
            Arc::new(TtlMap::new("session", map_config)),
            shared,
            tier_policy(
                cache.session_local_ttl_secs,
                cache.session_shared_ttl_secs,
                timeouts,
            ),
        );

        Self::new(
            responses,
            statuses,
            tokens,
            origin,
            io_pool,
            timeouts.clone(),
            stats,
        )
    }

    pub fn responses(&self) -> &TieredLookup<String> {
        &self.responses
    }

    pub fn statuses(&self) -> &TieredLookup<String> {
        &self.statuses
    }

    pub fn tokens(&self) -> &TokenPipeline {
        &self.tokens
    }

    pub fn stats(&self) -> &Arc<FeedStats> {
        &self.stats
    }

    /// Local map statistics for the token, data and session caches.
    pub fn cache_stats(&self) -> Vec<TtlMapStats> {
        let stats = vec![
            self.tokens.lookup().local().stats(),
            self.responses.local().stats(),
            self.statuses.local().stats(),
        ];
        for s in &stats {
            metrics::record_local_cache_entries(s);
        }
        stats
    }

    /// Serve one feed request.
    pub async fn stream(&self, request: &FeedRequest) -> Result<Frame, FeedError> {
        let started = Instant::now();
        self.stats.record_request();

        let result = self.stream_inner(request).await;

        metrics::record_feed_request("stream", outcome(&result), started.elapsed());
        result
    }

    async fn stream_inner(&self, request: &FeedRequest) -> Result<Frame, FeedError> {
        let key = request.key()?;
        let cache_key = key.cache_key();

        if let Some(data) = self.responses.get_local(&cache_key) {
            tracing::debug!(key = %cache_key, tier = %Tier::Local, "feed cache hit");
            self.record_hit("data", Tier::Local);
            return Ok(Frame::data(data));
        }

        let token = request.token.clone().unwrap_or_default();
        let (principal, remote) = self
            .race_token_and_remote(token, &cache_key)
            .await
            .map_err(|rejection| {
                tracing::info!(
                    key = %cache_key,
                    reason = rejection.reason(),
                    "feed request rejected"
                );
                metrics::record_rejection(rejection.reason());
                FeedError::Rejected(rejection)
            })?;

        if let Some(data) = remote {
            tracing::debug!(key = %cache_key, tier = %Tier::Shared, "feed cache hit");
            self.responses.put_local(&cache_key, data.clone());
            self.record_hit("data", Tier::Shared);
            return Ok(Frame::data(data));
        }
        metrics::record_cache_miss("data");

        let fetch = self.fetch_origin(principal, &key);
        match tokio::time::timeout(self.timeouts.origin(), fetch).await {
            Ok(fetched) if !fetched.starved => {
                let payload = fetched.payload.to_json();
                if !fetched.complete {
                    tracing::debug!(key = %cache_key, "origin result has defaults");
                }
                self.responses.store(&cache_key, payload.clone());
                Ok(Frame::data(payload))
            }
            Ok(_) => Ok(self.degrade(&cache_key, "fan_out")),
            Err(_) => Ok(self.degrade(&cache_key, "origin")),
        }
    }

    /// Resolve the token and peek at the shared response cache concurrently,
    /// both under the race timeout.
    ///
    /// A token that has not resolved by then is still awaited (it has its
    /// own bound); the shared lookup is abandoned and counts as a miss.
    async fn race_token_and_remote(
        &self,
        token: String,
        cache_key: &str,
    ) -> Result<(PrincipalId, Option<String>), TokenRejection> {
        let deadline = Instant::now() + self.timeouts.race();

        let tokens = Arc::clone(&self.tokens);
        let mut token_task = tokio::spawn(async move { tokens.resolve(&token).await });

        let responses = Arc::clone(&self.responses);
        let remote_key = cache_key.to_string();
        let remote_task = tokio::spawn(async move { responses.peek_shared(&remote_key).await });

        let (resolved, in_time) = match tokio::time::timeout_at(deadline, &mut token_task).await {
            Ok(resolved) => (resolved, true),
            Err(_) => {
                self.race_timed_out(cache_key);
                (token_task.await, false)
            }
        };

        let principal = match resolved {
            Ok(Ok(hit)) => hit.value,
            Ok(Err(rejection)) => return Err(rejection),
            Err(e) => {
                tracing::error!(error = %e, "token task failed");
                return Err(TokenRejection::Unavailable);
            }
        };

        if !in_time {
            return Ok((principal, None));
        }

        let remote = match tokio::time::timeout_at(deadline, remote_task).await {
            Ok(Ok(remote)) => remote,
            Ok(Err(e)) => {
                tracing::warn!(key = %cache_key, error = %e, "shared lookup task failed");
                None
            }
            Err(_) => {
                self.race_timed_out(cache_key);
                None
            }
        };
        Ok((principal, remote))
    }

    fn race_timed_out(&self, cache_key: &str) {
        tracing::warn!(
            key = %cache_key,
            timeout_ms = self.timeouts.race_ms,
            "token and shared lookup race timed out"
        );
        self.stats.record_timeout();
        metrics::record_timeout("race");
    }

    async fn fetch_origin(&self, viewer: PrincipalId, key: &FeedKey) -> OriginFetch {
        let viewer = viewer.get();
        let mut tasks = Vec::with_capacity(3);

        let origin = Arc::clone(&self.origin);
        let (type_id, kind) = (key.type_id.clone(), key.kind.clone());
        tasks.push(FetchTask::new(
            COMMENTS_TASK,
            Part::Comments(Vec::new()),
            async move {
                origin
                    .comments(viewer, &type_id, &kind)
                    .await
                    .map(Part::Comments)
            },
        ));

        let deadline = if key.is_session() {
            let origin = Arc::clone(&self.origin);
            let session_id = key.type_id.clone();
            tasks.push(FetchTask::new(POLLS_TASK, Part::Polls(Vec::new()), async move {
                origin.polls(&session_id, viewer).await.map(Part::Polls)
            }));

            let origin = Arc::clone(&self.origin);
            let session_id = key.type_id.clone();
            tasks.push(
                FetchTask::new(STATUS_TASK, Part::Status("timeout".into()), async move {
                    origin.session_status(&session_id).await.map(|status| {
                        Part::Status(status.unwrap_or_else(|| UNKNOWN_STATUS.to_string()))
                    })
                })
                .on_failure(Part::Status(UNAVAILABLE_STATUS.into())),
            );
            self.timeouts.fan_out()
        } else {
            self.timeouts.query()
        };

        let mut report = self.fetcher.run(tasks, deadline).await;

        for (name, outcome) in report.outcomes() {
            if !outcome.is_completed() {
                metrics::record_task_default(name, outcome.status.as_str());
            }
        }
        let complete = report.all_completed();
        let starved = report.none_completed() && !report.timed_out().is_empty();

        let mut payload = FeedPayload {
            comment_data: Vec::new(),
            survey_data: Vec::new(),
            session_status: String::new(),
        };
        for name in [COMMENTS_TASK, POLLS_TASK, STATUS_TASK] {
            match report.take(name) {
                Some(Part::Comments(comments)) => payload.comment_data = comments,
                Some(Part::Polls(polls)) => payload.survey_data = polls,
                Some(Part::Status(status)) => payload.session_status = status,
                None => {}
            }
        }

        tracing::debug!(
            key = %key.cache_key(),
            complete,
            elapsed_ms = report.elapsed().as_millis() as u64,
            "origin fetch finished"
        );
        OriginFetch {
            payload,
            complete,
            starved,
        }
    }

    /// Best-effort frame after the origin ran out of time.
    fn degrade(&self, cache_key: &str, stage: &'static str) -> Frame {
        self.stats.record_timeout();
        metrics::record_timeout(stage);

        match self.responses.get_stale(cache_key) {
            Some(data) => {
                tracing::info!(key = %cache_key, stage, "origin timed out, serving stale entry");
                metrics::record_degraded("stale");
                Frame::stale(data)
            }
            None => {
                tracing::info!(key = %cache_key, stage, "origin timed out, serving placeholder");
                metrics::record_degraded("placeholder");
                Frame::placeholder()
            }
        }
    }

    fn record_hit(&self, cache: &'static str, tier: Tier) {
        self.stats.record_cache_hit();
        metrics::record_cache_hit(cache, tier);
    }
}

fn outcome(result: &Result<Frame, FeedError>) -> &'static str {
    match result {
        Ok(frame) => frame.kind.as_str(),
        Err(FeedError::Rejected(_)) => "rejected",
        Err(FeedError::MissingParameter(_)) => "bad_request",
    }
}
