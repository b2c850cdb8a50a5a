//! SQLite store adapter for the crawl pipeline.
//!
//! The store is the single durable coordination point between the
//! dispatcher, the workers, and the purger. Every operation here is a
//! single transaction: claims run under `BEGIN IMMEDIATE` so that the
//! select-and-update is write-serialized and two concurrent callers can
//! never receive the same row, even across processes.
//!
//! Timestamps are stored as fixed-width UTC text (`%Y-%m-%d %H:%M:%S%.6f`)
//! so lexicographic comparison inside SQL equals chronological comparison.

mod host;
mod process;
mod refused;
mod schema;
mod tunebook;
mod url;

pub use host::HostRecord;
pub use process::ProcessRecord;
pub use tunebook::{IndexDisposition, ParseApplied, TunePitches, TunebookClaim, TunebookStatus};
pub use self::url::{
    extract_host, url_extension, ClaimedFetch, ClaimedParse, RetryDisposition, UrlRecord,
    UrlStatus,
};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Timestamp format used for every TEXT timestamp column.
///
/// Fixed fractional width keeps string ordering chronological.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// How long a connection waits on a locked database before surfacing
/// [`StoreError::Busy`].
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database is locked by another writer. Retryable.
    #[error("store is busy: {0}")]
    Busy(rusqlite::Error),

    /// Any other SQLite failure.
    #[error("store error: {0}")]
    Sqlite(rusqlite::Error),

    /// A stored value could not be decoded (bad status, bad timestamp).
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the caller should retry the operation after a pause.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &e {
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return StoreError::Busy(e);
            }
        }
        StoreError::Sqlite(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Formats a timestamp for storage.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a stored timestamp.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

/// Handle over the crawl database.
///
/// Cheap to share behind an [`std::sync::Arc`]; every process role opens
/// its own `Store` against the same file. All methods are synchronous and
/// short-lived; callers in async context invoke them directly between
/// await points.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (and if necessary creates) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Opens an in-memory database. Test use only: in-memory databases are
    /// private to their connection, so cross-process semantics do not apply.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` with the locked connection.
    ///
    /// The lock is never held across an await point; all work inside is
    /// synchronous.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        f(&mut conn)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 2, 10, 30, 0).unwrap();
        let stored = fmt_ts(ts);
        assert_eq!(parse_ts(&stored).unwrap(), ts);
    }

    #[test]
    fn test_timestamp_text_ordering_is_chronological() {
        let early = Utc.with_ymd_and_hms(2026, 8, 2, 10, 30, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        assert!(fmt_ts(early) < fmt_ts(late));
    }

    #[test]
    fn test_parse_ts_rejects_garbage() {
        assert!(matches!(parse_ts("yesterday"), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_open_in_memory_initializes_schema() {
        let store = Store::open_in_memory().unwrap();
        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM urls", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
