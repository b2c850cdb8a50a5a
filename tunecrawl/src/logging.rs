//! Logging infrastructure for TuneCrawl processes.
//!
//! Each process role writes to its own file under the log directory
//! (`logs/dispatcher.log`, `logs/fetcher.log`, ...) and to stdout.
//! Log files are append-only: the dispatcher tails the fetcher log
//! between runs to detect DNS failures, so history must survive worker
//! restarts. Filtering is configurable via `RUST_LOG`.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard will flush and close the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize logging for one process role.
///
/// Creates the log directory if needed and sets up dual output to the
/// role's log file and stdout.
///
/// # Arguments
///
/// * `log_dir` - Directory for log files (e.g., "logs")
/// * `log_file` - Log filename (e.g., "fetcher.log")
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_logging(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(false);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .with_target(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Log filename for a process role.
pub fn log_file_for_role(role: &str) -> String {
    format!("{role}.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_names() {
        assert_eq!(log_file_for_role("fetcher"), "fetcher.log");
        assert_eq!(log_file_for_role("dispatcher"), "dispatcher.log");
    }

    #[test]
    fn test_directory_creation() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep").join("logs");

        // init_logging sets a global subscriber, so only the directory
        // handling is exercised here; end-to-end output is covered by
        // running the binaries.
        fs::create_dir_all(&nested).unwrap();
        assert!(nested.exists());
    }
}
