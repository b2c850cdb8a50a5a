//! Host bookkeeping: access times, download counters, disable state.
//!
//! Hosts are created lazily on first contact. The disable flag and the
//! `last_access` timestamp drive the politeness gate inside
//! [`Store::claim_next_fetch`](super::Store::claim_next_fetch).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{fmt_ts, Result, Store};

/// One row of the `hosts` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub host: String,
    pub last_access: Option<String>,
    pub last_http_status: Option<u16>,
    pub downloads: u64,
    pub disabled: bool,
    pub disabled_reason: Option<String>,
    pub disabled_at: Option<String>,
}

impl Store {
    /// Records a fetch attempt against a host without crediting a
    /// download. Used for failed fetches.
    pub fn host_touch(
        &self,
        host: &str,
        http_status: Option<u16>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO hosts (host, last_access, last_http_status)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(host) DO UPDATE SET
                    last_access = excluded.last_access,
                    last_http_status = excluded.last_http_status
                "#,
                params![host, fmt_ts(now), http_status],
            )?;
            Ok(())
        })
    }

    /// Disables a host. Re-disabling an already disabled host is a no-op
    /// that keeps the original reason and timestamp.
    pub fn host_disable(&self, host: &str, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO hosts (host) VALUES (?1)",
                params![host],
            )?;
            let changed = conn.execute(
                r#"
                UPDATE hosts
                SET disabled = 1, disabled_reason = ?1, disabled_at = ?2
                WHERE host = ?3 AND disabled = 0
                "#,
                params![reason, fmt_ts(now), host],
            )?;
            Ok(changed > 0)
        })
    }

    /// Clears the disable flag on a host.
    pub fn host_enable(&self, host: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                r#"
                UPDATE hosts
                SET disabled = 0, disabled_reason = NULL, disabled_at = NULL
                WHERE host = ?1 AND disabled = 1
                "#,
                params![host],
            )?;
            Ok(changed > 0)
        })
    }

    /// Reads one host row.
    pub fn host_by_name(&self, host: &str) -> Result<Option<HostRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                r#"
                SELECT host, last_access, last_http_status, downloads,
                       disabled, disabled_reason, disabled_at
                FROM hosts WHERE host = ?1
                "#,
                params![host],
                map_host_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Aggregate host stats for the status surface:
    /// `(total, disabled, total_downloads)`.
    pub fn host_stats(&self) -> Result<(u64, u64, u64)> {
        self.with_conn(|conn| {
            conn.query_row(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(disabled), 0),
                       COALESCE(SUM(downloads), 0)
                FROM hosts
                "#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(Into::into)
        })
    }

    /// Deletes every host disabled for DNS failures along with all of its
    /// URLs. Returns `(urls_deleted, hosts_deleted)`.
    pub fn delete_dns_disabled(&self) -> Result<(usize, usize)> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let urls = tx.execute(
                r#"
                DELETE FROM urls WHERE host IN (
                    SELECT host FROM hosts
                    WHERE disabled = 1 AND disabled_reason = 'dns'
                )
                "#,
                [],
            )?;
            let hosts = tx.execute(
                "DELETE FROM hosts WHERE disabled = 1 AND disabled_reason = 'dns'",
                [],
            )?;
            tx.commit()?;
            Ok((urls, hosts))
        })
    }

    /// Re-enables hosts disabled for timeouts whose `disabled_at` is older
    /// than `cutoff`. Returns the number of re-enabled hosts.
    pub fn reenable_timeout_hosts(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                r#"
                UPDATE hosts
                SET disabled = 0, disabled_reason = NULL, disabled_at = NULL
                WHERE disabled = 1 AND disabled_reason = 'timeout'
                  AND disabled_at <= ?1
                "#,
                params![fmt_ts(cutoff)],
            )?;
            Ok(changed)
        })
    }
}

/// Reserves the host's access slot at claim time, inside the claim
/// transaction. Without this, two URLs of one host could both be claimed
/// before either fetch completes.
pub(super) fn upsert_host_access(
    conn: &Connection,
    host: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO hosts (host, last_access) VALUES (?1, ?2)
        ON CONFLICT(host) DO UPDATE SET last_access = excluded.last_access
        "#,
        params![host, fmt_ts(now)],
    )?;
    Ok(())
}

fn map_host_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HostRecord> {
    Ok(HostRecord {
        host: row.get(0)?,
        last_access: row.get(1)?,
        last_http_status: row.get(2)?,
        downloads: row.get(3)?,
        disabled: row.get(4)?,
        disabled_reason: row.get(5)?,
        disabled_at: row.get(6)?,
    })
}
