//! Logging support for wex
//!
//! When logging is enabled via config or `--log`, engine operations are
//! logged to a file. Logs are written to ~/.wex/wex.log, or to the system
//! temp directory when the home directory is unavailable.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, registry};

const LOG_FILE: &str = "wex.log";

/// Initialize the logging system
///
/// Returns the path to the log file, or None if logging is not enabled.
/// `level` applies to the `wex` target unless `RUST_LOG` says otherwise.
pub fn init_logging(enabled: bool, level: &str) -> Result<Option<PathBuf>> {
    if !enabled {
        return Ok(None);
    }

    let log_dir = get_log_dir();
    if let Err(e) = fs::create_dir_all(&log_dir).with_context(|| format!("Failed to create log directory: {}", log_dir.display())) {
        // Never break editing because the log file is unavailable
        eprintln!("Warning: {:#}", e);
        return Ok(None);
    }

    let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("wex={}", level)));

    let subscriber = registry()
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .with(filter);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    Ok(Some(log_dir.join(LOG_FILE)))
}

/// Directory holding the log file
fn get_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".wex"))
        .unwrap_or_else(|| std::env::temp_dir().join("wex"))
}

/// Get the current log file path without initializing logging
pub fn get_current_log_path() -> PathBuf {
    get_log_dir().join(LOG_FILE)
}
