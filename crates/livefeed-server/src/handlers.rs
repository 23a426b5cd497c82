use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response, Sse},
};
use futures_util::stream;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::time::Instant;

use crate::feed::{FeedRequest, Frame};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SessionStatusParams {
    pub session_id: Option<String>,
}

/// Main feed: one frame per request.
pub async fn stream(
    State(state): State<AppState>,
    Query(request): Query<FeedRequest>,
) -> Response {
    match state.feed.stream(&request).await {
        Ok(frame) => sse(frame),
        Err(e) => e.into_response(),
    }
}

pub async fn session_status(
    State(state): State<AppState>,
    Query(params): Query<SessionStatusParams>,
) -> Response {
    match state.feed.session_status(params.session_id.as_deref()).await {
        Ok(frame) => sse(frame),
        Err(e) => e.into_response(),
    }
}

fn sse(frame: Frame) -> Response {
    let event = frame.into_event();
    Sse::new(stream::once(async move { Ok::<_, Infallible>(event) })).into_response()
}

// ---- Health ----

/// Overall health follows the origin store. The caches never fail, they
/// only miss.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_healthy = state.origin.healthy().await;
    let stats = state.stats.snapshot();

    let body = json!({
        "timestamp": now_ms(),
        "service": "livefeed-server",
        "status": health_label(db_healthy),
        "components": {
            "database": health_label(db_healthy),
            "cache": "healthy",
            "stream": "healthy",
        },
        "uptime_ms": stats.uptime_ms,
        "total_requests": stats.total_requests,
        "cache_hit_rate": stats.cache_hit_rate,
        "timeout_rate": stats.timeout_rate,
    });
    (status_code(db_healthy), Json(body))
}

pub async fn health_database(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let healthy = state.origin.healthy().await;
    let response_time_ms = started.elapsed().as_millis() as u64;

    let mut body = json!({
        "timestamp": now_ms(),
        "component": "database",
        "status": health_label(healthy),
        "response_time_ms": response_time_ms,
    });
    if let Some(pool) = state.origin.connections() {
        body["connection_pool"] = json!({
            "total_connections": pool.size,
            "idle_connections": pool.idle,
            "active_connections": pool.size.saturating_sub(pool.idle),
        });
    }
    (status_code(healthy), Json(body))
}

pub async fn health_cache(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.stats.snapshot();
    let shared_connected = state.shared.healthy().await;

    let mut sizes = Map::new();
    let mut locals = Map::new();
    for local in state.feed.cache_stats() {
        sizes.insert(local.name.to_string(), json!(local.size));
        locals.insert(
            local.name.to_string(),
            json!({
                "size": local.size,
                "max_size": local.max_size,
                "hits": local.hits,
                "misses": local.misses,
                "evictions": local.evictions,
                "hit_rate": local.hit_rate(),
            }),
        );
    }

    let body = json!({
        "timestamp": now_ms(),
        "component": "cache",
        "status": "healthy",
        "cache_hit_rate": stats.cache_hit_rate,
        "cache_sizes": Value::Object(sizes),
        "local_caches": Value::Object(locals),
        "shared_cache": if shared_connected { "connected" } else { "disconnected" },
        "performance_indicators": {
            "hit_rate": hit_rate_indicator(stats.cache_hit_rate),
        },
    });
    (StatusCode::OK, Json(body))
}

pub async fn health_performance(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.stats.snapshot();
    let healthy = stats.timeout_rate < 5.0;

    let body = json!({
        "timestamp": now_ms(),
        "component": "performance",
        "status": if healthy { "healthy" } else { "degraded" },
        "uptime_ms": stats.uptime_ms,
        "total_requests": stats.total_requests,
        "timeouts": stats.timeouts,
        "timeout_rate": stats.timeout_rate,
        "pools": {
            state.io_pool.name(): {
                "workers": state.io_pool.workers(),
                "in_flight": state.io_pool.in_flight(),
            },
            state.token_pool.name(): {
                "workers": state.token_pool.workers(),
                "in_flight": state.token_pool.in_flight(),
            },
        },
        "performance_indicators": {
            "timeout_rate": timeout_rate_indicator(stats.timeout_rate),
        },
    });
    (status_code(healthy), Json(body))
}

pub async fn metrics() -> Response {
    match crate::metrics::render_metrics() {
        Some(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

fn health_label(healthy: bool) -> &'static str {
    if healthy { "healthy" } else { "unhealthy" }
}

fn status_code(healthy: bool) -> StatusCode {
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

fn hit_rate_indicator(rate: f64) -> &'static str {
    if rate > 80.0 {
        "EXCELLENT"
    } else if rate > 60.0 {
        "GOOD"
    } else if rate > 40.0 {
        "MODERATE"
    } else {
        "LOW"
    }
}

fn timeout_rate_indicator(rate: f64) -> &'static str {
    if rate > 10.0 {
        "HIGH"
    } else if rate > 5.0 {
        "ELEVATED"
    } else {
        "NORMAL"
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicators() {
        assert_eq!(hit_rate_indicator(92.0), "EXCELLENT");
        assert_eq!(hit_rate_indicator(80.0), "GOOD");
        assert_eq!(hit_rate_indicator(41.0), "MODERATE");
        assert_eq!(hit_rate_indicator(0.0), "LOW");

        assert_eq!(timeout_rate_indicator(12.5), "HIGH");
        assert_eq!(timeout_rate_indicator(5.1), "ELEVATED");
        assert_eq!(timeout_rate_indicator(5.0), "NORMAL");
    }
}
