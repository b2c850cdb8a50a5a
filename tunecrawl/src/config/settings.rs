//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Store settings
    pub store: StoreSettings,
    /// Dispatcher scheduling settings
    pub dispatcher: DispatcherSettings,
    /// Fetcher HTTP settings
    pub fetcher: FetcherSettings,
    /// Purger maintenance settings
    pub purger: PurgerSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Path of the SQLite crawl database.
    pub path: PathBuf,
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// TCP port for the worker socket.
    pub port: u16,
    /// Minimum gap between requests to one host, in seconds.
    pub cooldown_seconds: u64,
    /// Failures after which a URL becomes `error`.
    pub max_retries: u32,
    /// Liveness reclaim threshold, in seconds.
    pub inflight_ttl_seconds: u64,
    /// Liveness sweep period, in seconds.
    pub sweep_interval_seconds: u64,
    /// Worker log scan period, in seconds.
    pub log_scan_interval_seconds: u64,
    /// Consecutive timeouts before a host is disabled.
    pub host_timeout_block_streak: u32,
    /// High-priority URL extension.
    pub abc_priority_extension: String,
    /// Backoff hint sent to idle workers, in milliseconds.
    pub idle_backoff_ms: u64,
}

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    /// HTTP timeout per request, in seconds.
    pub timeout_seconds: u64,
    /// User-Agent header value.
    pub user_agent: String,
}

/// Purger configuration.
#[derive(Debug, Clone)]
pub struct PurgerSettings {
    /// Seconds between maintenance passes.
    pub interval_seconds: u64,
    /// Hours a timeout-disabled host stays blocked.
    pub host_reenable_hours: u64,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Directory for per-process log files.
    pub directory: PathBuf,
}
