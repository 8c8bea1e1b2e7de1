// src/logging.rs

//! Logging setup for `rolld` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `ROLLD_LOG` environment variable, any `EnvFilter` directive
//!    (e.g. "debug" or "rolld::session=trace,info")
//! 3. default to `info`
//!
//! Logs go to STDERR; hosted applications' output is re-logged at debug.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "ROLLD_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level_directive(level));
    }
    env.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
