//! Worker roles: fetcher, parser, indexer.
//!
//! Workers are stateless consumers of dispatcher assignments. Each role
//! is a [`RoleExecutor`] plugged into the shared [`WorkerRunner`], which
//! owns the connection lifecycle: connect, hello, request loop, idle
//! backoff, reconnect with exponential backoff, and graceful drain of the
//! in-flight assignment on shutdown.

mod fetcher;
mod indexer;
mod parser;
mod runner;

pub use fetcher::{extract_links, DocumentFetcher, FetchExecutor, HttpFetcher};
pub use indexer::IndexExecutor;
pub use parser::ParseExecutor;
pub use runner::{RoleExecutor, WorkerConfig, WorkerRunner};

use thiserror::Error;

/// Worker-side errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Protocol(#[from] crate::protocol::ProtocolError),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}
