//! Log setup for the livefeed binary.
//!
//! The configured level applies to the livefeed crates and to request
//! tracing; everything else (sqlx, redis, hyper) stays at `warn` so the
//! feed's own events are not buried. `RUST_LOG` replaces all of it.

use std::sync::OnceLock;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

const FEED_TARGETS: &[&str] = &[
    "livefeed_server",
    "livefeed_core",
    "livefeed_auth",
    "tower_http",
];

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Install the global subscriber at `info`. Safe to call more than once.
pub fn init_tracing() {
    let filter = if rust_log_set() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(directives(LevelFilter::INFO))
    };

    let (filter, handle) = reload::Layer::new(filter);
    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .is_ok()
    {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Switch the livefeed crates to `level` once the config is loaded.
///
/// Ignored when `RUST_LOG` is set or the level does not parse.
pub fn apply_logging_level(level: &str) {
    if rust_log_set() {
        tracing::debug!("RUST_LOG set, keeping its filter");
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    let Some(filter) = feed_filter(level) else {
        tracing::warn!(level, "unknown logging level, keeping the current one");
        return;
    };
    if let Err(e) = handle.reload(filter) {
        tracing::warn!(error = %e, "could not change logging level");
    }
}

fn feed_filter(level: &str) -> Option<EnvFilter> {
    let level = level.trim().parse::<LevelFilter>().ok()?;
    EnvFilter::try_new(directives(level)).ok()
}

fn directives(level: LevelFilter) -> String {
    let feed: Vec<String> = FEED_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    format!("warn,{}", feed.join(","))
}

fn rust_log_set() -> bool {
    std::env::var("RUST_LOG").is_ok_and(|v| !v.is_empty())
}
