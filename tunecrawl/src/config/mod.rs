//! Configuration for TuneCrawl processes.
//!
//! All roles read the same INI file at `~/.tunecrawl/config.ini`; each
//! struct in [`settings`] mirrors one `[section]`. Use
//! [`ConfigFile::load()`] to load settings or
//! [`ConfigFile::ensure_exists()`] to create a default file.
//!
//! # Example
//!
//! ```
//! use tunecrawl::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! assert_eq!(config.dispatcher.port, 8888);
//! assert_eq!(config.dispatcher.cooldown_seconds, 30);
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    ConfigFile, DispatcherSettings, FetcherSettings, LoggingSettings, PurgerSettings,
    StoreSettings,
};
