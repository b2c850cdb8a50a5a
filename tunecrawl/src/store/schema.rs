//! Schema creation for the crawl database.

use rusqlite::Connection;

use super::Result;

/// Creates all tables and indexes if they do not exist yet.
///
/// Idempotent; safe to run on every open.
pub(super) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Every URL the crawler knows about, with its pipeline state.
        CREATE TABLE IF NOT EXISTS urls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT UNIQUE NOT NULL,
            host TEXT,
            url_extension TEXT,
            link_distance INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT '',
            retries INTEGER NOT NULL DEFAULT 0,
            dispatched_at TEXT,
            downloaded_at TEXT,
            http_status INTEGER,
            mime_type TEXT,
            size_bytes INTEGER,
            document BLOB,
            erased INTEGER NOT NULL DEFAULT 0,
            has_abc INTEGER NOT NULL DEFAULT 0
        );

        -- Per-host access bookkeeping for the politeness gate.
        CREATE TABLE IF NOT EXISTS hosts (
            host TEXT PRIMARY KEY,
            last_access TEXT,
            last_http_status INTEGER,
            downloads INTEGER NOT NULL DEFAULT 0,
            disabled INTEGER NOT NULL DEFAULT 0,
            disabled_reason TEXT,
            disabled_at TEXT
        );

        -- One tunebook per source URL that yielded any tune.
        CREATE TABLE IF NOT EXISTS tunebooks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT UNIQUE NOT NULL,
            url_id INTEGER NOT NULL REFERENCES urls(id),
            created_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT '',
            retries INTEGER NOT NULL DEFAULT 0,
            dispatched_at TEXT
        );

        -- Individual tunes with ABC headers, pitch string, interval vector.
        CREATE TABLE IF NOT EXISTS tunes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tunebook_id INTEGER NOT NULL REFERENCES tunebooks(id),
            reference_number TEXT,
            title TEXT,
            composer TEXT,
            origin TEXT,
            area TEXT,
            meter TEXT,
            unit_note_length TEXT,
            tempo TEXT,
            parts TEXT,
            transcription TEXT,
            notes TEXT,
            tune_group TEXT,
            history TEXT,
            key TEXT,
            rhythm TEXT,
            book TEXT,
            discography TEXT,
            source TEXT,
            instruction TEXT,
            tune_body TEXT,
            pitches TEXT,
            intervals TEXT
        );

        -- Filename extensions that never enter the queue. Stored
        -- lowercase without the leading dot.
        CREATE TABLE IF NOT EXISTS refused_extensions (
            extension TEXT PRIMARY KEY
        );

        -- Worker process registry for the management surface.
        CREATE TABLE IF NOT EXISTS processes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pid INTEGER NOT NULL,
            role TEXT NOT NULL,
            worker_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running',
            started_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_urls_status ON urls(status);
        CREATE INDEX IF NOT EXISTS idx_urls_host ON urls(host);
        CREATE INDEX IF NOT EXISTS idx_urls_status_created ON urls(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_tunebooks_status ON tunebooks(status);
        CREATE INDEX IF NOT EXISTS idx_tunes_tunebook ON tunes(tunebook_id);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::store::Store;

    #[test]
    fn test_init_schema_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| super::init_schema(conn))
            .expect("re-running schema init should succeed");
    }

    #[test]
    fn test_url_uniqueness_enforced() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO urls (url, created_at) VALUES ('http://h/a', '2026-01-01 00:00:00.000000')",
                    [],
                )?;
                let second = conn.execute(
                    "INSERT OR IGNORE INTO urls (url, created_at) VALUES ('http://h/a', '2026-01-01 00:00:00.000000')",
                    [],
                )?;
                assert_eq!(second, 0);
                Ok(())
            })
            .unwrap();
    }
}
