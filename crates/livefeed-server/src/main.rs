use std::process::ExitCode;

use livefeed_server::ServerBuilder;
use livefeed_server::config::loader::load_config;
use livefeed_server::observability::{apply_logging_level, init_tracing};

const DEFAULT_CONFIG: &str = "livefeed.toml";

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Warning: failed to load .env file: {e}");
    }

    init_tracing();

    let config_path = config_path(std::env::args().skip(1));
    let cfg = match load_config(Some(config_path.as_str())) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(path = %config_path, error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };
    apply_logging_level(&cfg.logging.level);
    livefeed_server::metrics::init_metrics();

    tracing::info!(
        path = %config_path,
        addr = %cfg.addr(),
        redis = cfg.redis.enabled,
        race_ms = cfg.timeouts.race_ms,
        origin_ms = cfg.timeouts.origin_ms,
        "configuration loaded"
    );

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "livefeed failed to start");
            return ExitCode::from(2);
        }
    };
    server.state().startup_report().await.log();

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "livefeed stopped with an error");
            ExitCode::FAILURE
        }
    }
}

/// `--config <path>`, then `LIVEFEED_CONFIG`, then `livefeed.toml`.
fn config_path(mut args: impl Iterator<Item = String>) -> String {
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return path;
        }
    }

    std::env::var("LIVEFEED_CONFIG")
        .ok()
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_flag_wins() {
        let args = ["--port", "1", "--config", "/etc/livefeed/prod.toml"].map(String::from);
        assert_eq!(config_path(args.into_iter()), "/etc/livefeed/prod.toml");
    }
}
