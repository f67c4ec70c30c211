//! Tracing setup for embedding processes.
//!
//! The engine itself only emits `tracing` events; hosts call one of these
//! initializers (or install their own subscriber) before constructing the
//! engine.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter (e.g. `quay_engine=debug`).
const LOG_ENV: &str = "QUAY_LOG";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes stderr logging. Safe to call more than once; later calls are
/// no-ops if a global subscriber is already installed.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Initializes daily-rotated file logging under `dir`.
///
/// The returned guard must be kept alive for buffered lines to flush.
///
/// # Errors
/// Returns an error if the log directory cannot be created.
pub fn init_file(dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, "engine.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_reentrant() {
        init();
        init();
    }

    #[test]
    fn test_init_file_creates_log_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("logs");
        let _guard = init_file(&dir).unwrap();
        assert!(dir.exists());
    }
}
