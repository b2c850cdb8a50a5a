//! CLI error type with user-facing rendering.

use std::fmt;

use tunecrawl::config::ConfigFileError;
use tunecrawl::store::StoreError;
use tunecrawl::supervisor::SupervisorError;
use tunecrawl::workers::WorkerError;

/// Errors surfaced to the terminal.
#[derive(Debug)]
pub enum CliError {
    Config(ConfigFileError),
    Store(StoreError),
    Io(std::io::Error),
    Worker(WorkerError),
    Supervisor(SupervisorError),
    Usage(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Store(e) => write!(f, "Store error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Worker(e) => write!(f, "Worker error: {e}"),
            Self::Supervisor(e) => write!(f, "Supervisor error: {e}"),
            Self::Usage(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        Self::Config(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WorkerError> for CliError {
    fn from(e: WorkerError) -> Self {
        Self::Worker(e)
    }
}

impl From<SupervisorError> for CliError {
    fn from(e: SupervisorError) -> Self {
        Self::Supervisor(e)
    }
}
