//! TuneCrawl - crawl pipeline for ABC music notation on the open web
//!
//! This library provides the building blocks of the crawl pipeline: a
//! dispatcher that owns all scheduling decisions, stateless worker roles
//! (fetcher, parser, indexer) that talk to it over a framed TCP protocol,
//! and a SQLite store that is the single durable coordination point.
//!
//! # High-Level API
//!
//! ```ignore
//! use tunecrawl::config::ConfigFile;
//! use tunecrawl::dispatcher::Dispatcher;
//! use tunecrawl::store::Store;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ConfigFile::load().unwrap_or_default();
//! let store = Store::open(&config.store.path)?;
//! let dispatcher = Dispatcher::bind(store, (&config).into()).await?;
//! dispatcher.run(CancellationToken::new()).await;
//! ```

pub mod abc;
pub mod config;
pub mod dispatcher;
pub mod intervals;
pub mod logging;
pub mod policy;
pub mod protocol;
pub mod purger;
pub mod store;
pub mod supervisor;
pub mod workers;

/// Version of the TuneCrawl library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
