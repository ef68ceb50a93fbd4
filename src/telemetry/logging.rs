//! Logging configuration and initialization.
//!
//! `RUST_LOG` wins over the `[log]` section of the config file; output is
//! pretty, compact or json.

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// `[log]` section of the config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// error, warn, info, debug, trace
    pub level: String,
    /// pretty, compact, json
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(config: Option<&LogConfig>) {
    let filter = match config {
        _ if std::env::var_os("RUST_LOG").is_some() => EnvFilter::from_default_env(),
        Some(cfg) => EnvFilter::new(parse_level(&cfg.level).as_str()),
        None => EnvFilter::new("info"),
    };

    let output: Box<dyn Layer<Registry> + Send + Sync> =
        match config.map_or("pretty", |c| c.format.as_str()) {
            "json" => fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
            "compact" => fmt::layer().compact().boxed(),
            _ => fmt::layer().boxed(),
        };

    let _ = tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init();
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}
