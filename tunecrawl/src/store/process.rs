//! Worker process registry, mirrored for the management surface.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{fmt_ts, Result, Store};

/// One row of the `processes` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub role: String,
    pub worker_id: String,
    pub status: String,
    pub started_at: String,
}

impl Store {
    /// Registers a spawned worker process.
    pub fn process_register(
        &self,
        pid: u32,
        role: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO processes (pid, role, worker_id, started_at) VALUES (?1, ?2, ?3, ?4)",
                params![pid, role, worker_id, fmt_ts(now)],
            )?;
            Ok(())
        })
    }

    /// Removes a process record after the process exits.
    pub fn process_remove(&self, pid: u32) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM processes WHERE pid = ?1", params![pid])?;
            Ok(())
        })
    }

    /// Drops every registered process (startup cleanup).
    pub fn process_clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM processes", [])?;
            Ok(())
        })
    }

    /// Lists registered processes, oldest first.
    pub fn process_list(&self) -> Result<Vec<ProcessRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pid, role, worker_id, status, started_at FROM processes ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ProcessRecord {
                        pid: row.get(0)?,
                        role: row.get(1)?,
                        worker_id: row.get(2)?,
                        status: row.get(3)?,
                        started_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
