//! Tracing setup for the CLI.
//!
//! The level comes from `--verbose`/`--quiet` or the `FNUG_LOG_LEVEL`
//! environment variable (Python-style names), defaulting to warnings.
//! With `--log-file` the subscriber writes there instead of stderr, which
//! keeps the TUI's screen clean.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;

/// Environment variable holding a `DEBUG|INFO|WARNING|ERROR|CRITICAL` level.
pub const LOG_LEVEL_ENV: &str = "FNUG_LOG_LEVEL";

fn parse_level(value: &str) -> Option<LevelFilter> {
    match value.trim().to_uppercase().as_str() {
        "DEBUG" => Some(LevelFilter::DEBUG),
        "INFO" => Some(LevelFilter::INFO),
        "WARNING" => Some(LevelFilter::WARN),
        "ERROR" => Some(LevelFilter::ERROR),
        "CRITICAL" => Some(LevelFilter::ERROR),
        _ => None,
    }
}

fn level(verbose: bool, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    if verbose {
        return LevelFilter::INFO;
    }
    std::env::var(LOG_LEVEL_ENV)
        .ok()
        .as_deref()
        .and_then(parse_level)
        .unwrap_or(LevelFilter::WARN)
}

pub fn setup(verbose: bool, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let max_level = level(verbose, quiet);

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_max_level(max_level)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(max_level)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}
