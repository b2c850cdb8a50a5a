//! Default values for all configuration settings.

use std::path::PathBuf;

use super::settings::*;

/// Default SQLite database path, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = "crawler.db";

/// Default worker socket port.
pub const DEFAULT_DISPATCHER_PORT: u16 = 8888;

/// Default per-host cooldown in seconds.
pub const DEFAULT_COOLDOWN_SECONDS: u64 = 30;

/// Default retry-ladder bound.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default in-flight TTL in seconds.
pub const DEFAULT_INFLIGHT_TTL_SECONDS: u64 = 120;

/// Default liveness sweep period in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 20;

/// Default worker log scan period in seconds.
pub const DEFAULT_LOG_SCAN_INTERVAL_SECONDS: u64 = 60;

/// Default consecutive-timeout streak before a host is disabled.
pub const DEFAULT_HOST_TIMEOUT_BLOCK_STREAK: u32 = 3;

/// Default high-priority extension.
pub const DEFAULT_ABC_PRIORITY_EXTENSION: &str = ".abc";

/// Default idle backoff hint in milliseconds.
pub const DEFAULT_IDLE_BACKOFF_MS: u64 = 1000;

/// Default fetcher HTTP timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 30;

/// Default purger pass period in seconds.
pub const DEFAULT_PURGE_INTERVAL_SECONDS: u64 = 60;

/// Default timeout-host re-enable window in hours.
pub const DEFAULT_HOST_REENABLE_HOURS: u64 = 24;

/// Default log directory, relative to the working directory.
pub const DEFAULT_LOG_DIRECTORY: &str = "logs";

/// Default fetcher User-Agent.
pub fn default_user_agent() -> String {
    format!("tunecrawl/{}", crate::VERSION)
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            dispatcher: DispatcherSettings::default(),
            fetcher: FetcherSettings::default(),
            purger: PurgerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISPATCHER_PORT,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            inflight_ttl_seconds: DEFAULT_INFLIGHT_TTL_SECONDS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            log_scan_interval_seconds: DEFAULT_LOG_SCAN_INTERVAL_SECONDS,
            host_timeout_block_streak: DEFAULT_HOST_TIMEOUT_BLOCK_STREAK,
            abc_priority_extension: DEFAULT_ABC_PRIORITY_EXTENSION.to_string(),
            idle_backoff_ms: DEFAULT_IDLE_BACKOFF_MS,
        }
    }
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_FETCH_TIMEOUT_SECONDS,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for PurgerSettings {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_PURGE_INTERVAL_SECONDS,
            host_reenable_hours: DEFAULT_HOST_REENABLE_HOURS,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_LOG_DIRECTORY),
        }
    }
}
