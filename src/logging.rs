// src/logging.rs

//! Logging setup for `wavedag` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `WAVEDAG_LOG` environment variable, either a level ("debug") or a
//!    full filter ("wavedag=debug,warn")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout carries only command output
//! (`plan`, `status`).

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "WAVEDAG_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let filter = EnvFilter::try_new(directive(cli_level, env.as_deref()))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("initialising logging: {e}"))
}

/// Filter directive to use. An unparsable environment value is ignored.
fn directive(cli_level: Option<LogLevel>, env: Option<&str>) -> String {
    if let Some(level) = cli_level {
        return level_name(level).to_string();
    }
    env.map(str::trim)
        .filter(|s| !s.is_empty() && EnvFilter::try_new(s).is_ok())
        .unwrap_or(DEFAULT_DIRECTIVE)
        .to_string()
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_beats_environment() {
        assert_eq!(directive(Some(LogLevel::Debug), Some("warn")), "debug");
    }

    #[test]
    fn environment_accepts_full_filters() {
        assert_eq!(directive(None, Some("wavedag=trace,warn")), "wavedag=trace,warn");
    }

    #[test]
    fn falls_back_to_info() {
        assert_eq!(directive(None, None), "info");
        assert_eq!(directive(None, Some("   ")), "info");
        assert_eq!(directive(None, Some("wavedag=loud")), "info");
    }
}
