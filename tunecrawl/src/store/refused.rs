//! Refused filename extensions.
//!
//! A pipeline-scoped filter over what enters the queue: links whose path
//! ends in a refused extension are never inserted, and the purger deletes
//! rows that were stored before the extension was refused. Managed by the
//! operator through the CLI and the management UI.

use rusqlite::{params, Connection};

use super::{Result, Store};

impl Store {
    /// Adds an extension to the refusal list. Accepts `exe`, `.exe`, or
    /// `.EXE`; stored normalized. Returns false if it was already listed
    /// or normalizes to nothing.
    pub fn refuse_extension(&self, extension: &str) -> Result<bool> {
        let Some(normalized) = normalize_extension(extension) else {
            return Ok(false);
        };
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO refused_extensions (extension) VALUES (?1)",
                params![normalized],
            )?;
            Ok(changed > 0)
        })
    }

    /// Removes an extension from the refusal list. Returns false if it
    /// was not listed.
    pub fn allow_extension(&self, extension: &str) -> Result<bool> {
        let Some(normalized) = normalize_extension(extension) else {
            return Ok(false);
        };
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM refused_extensions WHERE extension = ?1",
                params![normalized],
            )?;
            Ok(changed > 0)
        })
    }

    /// The current refusal list, sorted.
    pub fn refused_extensions(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT extension FROM refused_extensions ORDER BY extension")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    /// Deletes already-stored URLs whose extension has since been
    /// refused. Returns the number of deleted rows.
    pub fn purge_refused_urls(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                r#"
                DELETE FROM urls
                WHERE url_extension IS NOT NULL
                  AND SUBSTR(url_extension, 2) IN
                      (SELECT extension FROM refused_extensions)
                "#,
                [],
            )?;
            Ok(deleted)
        })
    }
}

/// True when `extension` (dot included, lowercase) is on the refusal
/// list. Runs inside the caller's transaction so link insertion and the
/// gate see one consistent list.
pub(super) fn extension_refused(conn: &Connection, extension: &str) -> Result<bool> {
    let refused: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM refused_extensions WHERE extension = ?1)",
        params![extension.trim_start_matches('.')],
        |row| row.get(0),
    )?;
    Ok(refused)
}

/// Normalizes operator input to the stored form: trimmed, leading dot
/// stripped, lowercase. `None` when nothing is left.
fn normalize_extension(extension: &str) -> Option<String> {
    let normalized = extension.trim().trim_start_matches('.').to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}
