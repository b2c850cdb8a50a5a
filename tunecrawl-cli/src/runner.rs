//! Common process bootstrap: config, logging, store, shutdown signals.

use crate::error::CliError;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tunecrawl::config::ConfigFile;
use tunecrawl::logging::{init_logging, log_file_for_role, LoggingGuard};
use tunecrawl::store::Store;

/// Runner that manages one process role's lifecycle.
pub struct CliRunner {
    /// Logging guard - keeps logging active while the runner exists.
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    config: ConfigFile,
}

impl CliRunner {
    /// Loads configuration and initializes logging into the role's file.
    pub fn new(role: &str) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;
        let logging_guard = init_logging(&config.logging.directory, &log_file_for_role(role))?;
        Ok(Self {
            logging_guard,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Opens the crawl store configured for this installation.
    pub fn open_store(&self) -> Result<Store, CliError> {
        Ok(Store::open(&self.config.store.path)?)
    }

    /// Dispatcher address workers connect to.
    pub fn dispatcher_addr(&self) -> String {
        format!("127.0.0.1:{}", self.config.dispatcher.port)
    }

    /// Cancellation token wired to SIGINT and SIGTERM.
    pub fn shutdown_token(&self) -> CancellationToken {
        let token = CancellationToken::new();

        let ctrl_c = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received; shutting down");
                ctrl_c.cancel();
            }
        });

        #[cfg(unix)]
        {
            let term = token.clone();
            tokio::spawn(async move {
                let mut sigterm = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(signal) => signal,
                    Err(_) => return,
                };
                if sigterm.recv().await.is_some() {
                    info!("SIGTERM received; shutting down");
                    term.cancel();
                }
            });
        }

        token
    }
}
