//! URL lifecycle: claims, result application, recovery sweeps.
//!
//! The URL state machine (initial `new`, terminals `indexed` and `error`):
//!
//! ```text
//! new -> dispatched -> fetched -> parsing -> parsed -> indexing -> indexed
//!            |                       |                     |
//!            +----- retry ladder ----+---------------------+--> error
//! ```
//!
//! Claims flip a row into an in-flight status (`dispatched`, `parsing`,
//! `indexing`) with `dispatched_at = now` inside one immediate
//! transaction, so a row is handed to exactly one worker.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::host::upsert_host_access;
use super::{fmt_ts, Result, Store, StoreError};

/// Pipeline state of a URL. `New` is stored as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlStatus {
    New,
    Dispatched,
    Fetched,
    Parsing,
    Parsed,
    Indexing,
    Indexed,
    Error,
}

impl UrlStatus {
    /// Stored encoding of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlStatus::New => "",
            UrlStatus::Dispatched => "dispatched",
            UrlStatus::Fetched => "fetched",
            UrlStatus::Parsing => "parsing",
            UrlStatus::Parsed => "parsed",
            UrlStatus::Indexing => "indexing",
            UrlStatus::Indexed => "indexed",
            UrlStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "" => Ok(UrlStatus::New),
            "dispatched" => Ok(UrlStatus::Dispatched),
            "fetched" => Ok(UrlStatus::Fetched),
            "parsing" => Ok(UrlStatus::Parsing),
            "parsed" => Ok(UrlStatus::Parsed),
            "indexing" => Ok(UrlStatus::Indexing),
            "indexed" => Ok(UrlStatus::Indexed),
            "error" => Ok(UrlStatus::Error),
            other => Err(StoreError::Corrupt(format!("unknown url status '{other}'"))),
        }
    }
}

impl std::fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlStatus::New => write!(f, "new"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Extracts the lowercased hostname of a URL, if it has one.
pub fn extract_host(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Extracts the filename extension of a URL path, dot included and
/// lowercased (`".abc"`). Query and fragment are ignored.
pub fn url_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.last()?;
    let dot = last_segment.rfind('.')?;
    let ext = &last_segment[dot..];
    // A bare dot or an absurdly long suffix is not an extension.
    if ext.len() < 2 || ext.len() > 10 {
        return None;
    }
    Some(ext.to_lowercase())
}

/// A URL handed to a fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedFetch {
    pub id: i64,
    pub url: String,
    pub host: Option<String>,
    pub link_distance: u32,
}

/// A fetched document handed to a parser.
#[derive(Debug, Clone)]
pub struct ClaimedParse {
    pub id: i64,
    pub url: String,
    pub mime_type: Option<String>,
    pub document: Vec<u8>,
}

/// Outcome of a retry-ladder step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDisposition {
    /// Retry count after the increment.
    pub retries: u32,
    /// True when the ladder is exhausted and the row went terminal.
    pub exhausted: bool,
}

/// Full URL row, used by tests and the status surface.
#[derive(Debug, Clone)]
pub struct UrlRecord {
    pub id: i64,
    pub url: String,
    pub host: Option<String>,
    pub status: UrlStatus,
    pub retries: u32,
    pub link_distance: u32,
    pub dispatched_at: Option<String>,
    pub downloaded_at: Option<String>,
    pub http_status: Option<u16>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub has_abc: bool,
    pub erased: bool,
}

impl Store {
    /// Inserts a URL at `link_distance` hops from a seed. Returns false if
    /// the URL was already known (`url` is UNIQUE).
    pub fn insert_url(&self, url: &str, link_distance: u32, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| insert_url_row(conn, url, link_distance, now))
    }

    /// Claims the best eligible `new` URL for a fetcher.
    ///
    /// Eligibility: the host is not disabled and was last accessed at
    /// least `cooldown` ago. Priority: URLs whose path ends in
    /// `abc_extension` first, then oldest `created_at`, ties by id.
    ///
    /// Claiming reserves `hosts.last_access = now` in the same
    /// transaction so a second URL of the same host cannot be claimed
    /// before this fetch completes.
    pub fn claim_next_fetch(
        &self,
        now: DateTime<Utc>,
        cooldown: Duration,
        abc_extension: &str,
    ) -> Result<Option<ClaimedFetch>> {
        let cutoff = fmt_ts(now - cooldown);
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let claimed = tx
                .query_row(
                    r#"
                    UPDATE urls SET status = 'dispatched', dispatched_at = ?1
                    WHERE id = (
                        SELECT u.id FROM urls u
                        LEFT JOIN hosts h ON h.host = u.host
                        WHERE u.status = ''
                          AND IFNULL(h.disabled, 0) = 0
                          AND (h.last_access IS NULL OR h.last_access <= ?2)
                        ORDER BY (IFNULL(u.url_extension, '') = ?3) DESC,
                                 u.created_at ASC, u.id ASC
                        LIMIT 1
                    )
                    RETURNING id, url, host, link_distance
                    "#,
                    params![fmt_ts(now), cutoff, abc_extension],
                    |row| {
                        Ok(ClaimedFetch {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            host: row.get(2)?,
                            link_distance: row.get(3)?,
                        })
                    },
                )
                .optional()?;

            if let Some(claim) = &claimed {
                if let Some(host) = &claim.host {
                    upsert_host_access(&tx, host, now)?;
                }
            }
            tx.commit()?;
            Ok(claimed)
        })
    }

    /// Claims the oldest `fetched` URL for a parser, flipping it to
    /// `parsing`. Ordering follows the original fetch dispatch time.
    pub fn claim_next_parse(&self, now: DateTime<Utc>) -> Result<Option<ClaimedParse>> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let claimed = tx
                .query_row(
                    r#"
                    UPDATE urls SET status = 'parsing', dispatched_at = ?1
                    WHERE id = (
                        SELECT id FROM urls WHERE status = 'fetched'
                        ORDER BY dispatched_at ASC, id ASC
                        LIMIT 1
                    )
                    RETURNING id, url, mime_type, document
                    "#,
                    params![fmt_ts(now)],
                    |row| {
                        Ok(ClaimedParse {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            mime_type: row.get(2)?,
                            document: row.get::<_, Option<Vec<u8>>>(3)?.unwrap_or_default(),
                        })
                    },
                )
                .optional()?;
            tx.commit()?;
            Ok(claimed)
        })
    }

    /// Applies a successful fetch: stores the document, advances the URL
    /// to `fetched`, credits the host, and inserts every new link one hop
    /// further from the seed. Returns the number of new links inserted.
    pub fn apply_fetch_success(
        &self,
        id: i64,
        http_status: u16,
        mime_type: Option<&str>,
        body: &[u8],
        links: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let (host, link_distance): (Option<String>, u32) = tx.query_row(
                "SELECT host, link_distance FROM urls WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            tx.execute(
                r#"
                UPDATE urls
                SET status = 'fetched', downloaded_at = ?1, size_bytes = ?2,
                    mime_type = ?3, http_status = ?4, document = ?5,
                    erased = 0, retries = 0
                WHERE id = ?6
                "#,
                params![
                    fmt_ts(now),
                    body.len() as i64,
                    mime_type,
                    http_status,
                    body,
                    id
                ],
            )?;

            if let Some(host) = &host {
                tx.execute(
                    r#"
                    INSERT INTO hosts (host, last_access, last_http_status, downloads)
                    VALUES (?1, ?2, ?3, 1)
                    ON CONFLICT(host) DO UPDATE SET
                        last_access = excluded.last_access,
                        last_http_status = excluded.last_http_status,
                        downloads = downloads + 1
                    "#,
                    params![host, fmt_ts(now), http_status],
                )?;
            }

            let mut inserted = 0;
            for link in links {
                if insert_url_row(&tx, link, link_distance + 1, now)? {
                    inserted += 1;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    /// Applies a transient fetch failure: one retry-ladder step.
    ///
    /// Below `max_retries` the URL reverts to `new` for re-queueing; at
    /// the bound it goes terminal `error`.
    pub fn apply_fetch_retry(
        &self,
        id: i64,
        http_status: Option<u16>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<RetryDisposition> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let disposition = ladder_step(&tx, id, UrlStatus::New, http_status, max_retries, now)?;
            tx.commit()?;
            Ok(disposition)
        })
    }

    /// Applies a terminal fetch failure (HTTP 4xx): straight to `error`,
    /// no retry.
    pub fn apply_fetch_terminal(
        &self,
        id: i64,
        http_status: Option<u16>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE urls
                SET status = 'error', downloaded_at = ?1, http_status = ?2,
                    dispatched_at = NULL
                WHERE id = ?3
                "#,
                params![fmt_ts(now), http_status, id],
            )?;
            Ok(())
        })
    }

    /// Reverts a dispatched URL to `new` without consuming a retry.
    ///
    /// Used for DNS failures: the disabled-host gate keeps the row out of
    /// the queue, and the purger removes it.
    pub fn revert_dispatched(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE urls SET status = '', dispatched_at = NULL WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
    }

    /// One retry-ladder step for a parse failure; reverts to `fetched`
    /// below the bound.
    pub fn apply_parse_retry(
        &self,
        id: i64,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<RetryDisposition> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let disposition = ladder_step(&tx, id, UrlStatus::Fetched, None, max_retries, now)?;
            tx.commit()?;
            Ok(disposition)
        })
    }

    /// Reverts every in-flight URL whose claim is older than `ttl` back to
    /// its queueable predecessor. Returns the number of reverted URLs.
    pub fn release_stuck(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let cutoff = fmt_ts(now - ttl);
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let released = revert_in_flight(&tx, Some(&cutoff))?;
            tx.commit()?;
            Ok(released)
        })
    }

    /// Startup recovery: reverts every in-flight URL regardless of age so
    /// no orphan of a previous crash blocks the queue.
    pub fn reset_on_startup(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let released = revert_in_flight(&tx, None)?;
            tx.commit()?;
            Ok(released)
        })
    }

    /// Reads one URL row.
    pub fn url_by_id(&self, id: i64) -> Result<Option<UrlRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                r#"
                SELECT id, url, host, status, retries, link_distance,
                       dispatched_at, downloaded_at, http_status, mime_type,
                       size_bytes, has_abc, erased
                FROM urls WHERE id = ?1
                "#,
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<u16>>(8)?,
                        row.get::<_, Option<String>>(9)?,
                        row.get::<_, Option<u64>>(10)?,
                        row.get::<_, bool>(11)?,
                        row.get::<_, bool>(12)?,
                    ))
                },
            )
            .optional()?
            .map(|raw| {
                Ok(UrlRecord {
                    id: raw.0,
                    url: raw.1,
                    host: raw.2,
                    status: UrlStatus::parse(&raw.3)?,
                    retries: raw.4,
                    link_distance: raw.5,
                    dispatched_at: raw.6,
                    downloaded_at: raw.7,
                    http_status: raw.8,
                    mime_type: raw.9,
                    size_bytes: raw.10,
                    has_abc: raw.11,
                    erased: raw.12,
                })
            })
            .transpose()
        })
    }

    /// Reads one URL row by its textual URL.
    pub fn url_by_name(&self, url: &str) -> Result<Option<UrlRecord>> {
        let id = self.with_conn(|conn| {
            conn.query_row("SELECT id FROM urls WHERE url = ?1", params![url], |row| {
                row.get::<_, i64>(0)
            })
            .optional()
            .map_err(Into::into)
        })?;
        match id {
            Some(id) => self.url_by_id(id),
            None => Ok(None),
        }
    }

    /// Count of URLs per status, for the status surface.
    pub fn url_status_counts(&self) -> Result<Vec<(UrlStatus, u64)>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM urls GROUP BY status ORDER BY status")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(status, count)| Ok((UrlStatus::parse(&status)?, count)))
                .collect()
        })
    }

    /// Nulls out stored documents of parsed URLs that yielded no ABC.
    /// Returns the number of erased documents.
    pub fn erase_parsed_documents(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                r#"
                UPDATE urls SET document = NULL, size_bytes = 0, erased = 1
                WHERE status = 'parsed' AND has_abc = 0 AND erased = 0
                "#,
                [],
            )?;
            Ok(changed)
        })
    }
}

/// Inserts a URL row if it is not already known. `http`/`https` only;
/// URLs with a refused extension never enter the queue.
fn insert_url_row(
    conn: &Connection,
    url: &str,
    link_distance: u32,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Ok(false);
    }
    let host = extract_host(url);
    let extension = url_extension(url);
    if let Some(extension) = &extension {
        if super::refused::extension_refused(conn, extension)? {
            return Ok(false);
        }
    }
    let changed = conn.execute(
        r#"
        INSERT OR IGNORE INTO urls (url, host, url_extension, link_distance, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![url, host, extension, link_distance, fmt_ts(now)],
    )?;
    Ok(changed > 0)
}

/// Increments `retries` and either reverts the row to `revert_to` or, at
/// the bound, marks it terminal `error`.
fn ladder_step(
    conn: &Connection,
    id: i64,
    revert_to: UrlStatus,
    http_status: Option<u16>,
    max_retries: u32,
    now: DateTime<Utc>,
) -> Result<RetryDisposition> {
    conn.execute(
        "UPDATE urls SET retries = retries + 1 WHERE id = ?1",
        params![id],
    )?;
    let retries: u32 =
        conn.query_row("SELECT retries FROM urls WHERE id = ?1", params![id], |row| {
            row.get(0)
        })?;

    if retries >= max_retries {
        conn.execute(
            r#"
            UPDATE urls
            SET status = 'error', downloaded_at = ?1, http_status = ?2,
                dispatched_at = NULL
            WHERE id = ?3
            "#,
            params![fmt_ts(now), http_status, id],
        )?;
    } else {
        conn.execute(
            "UPDATE urls SET status = ?1, http_status = ?2, dispatched_at = NULL WHERE id = ?3",
            params![revert_to.as_str(), http_status, id],
        )?;
    }
    Ok(RetryDisposition {
        retries,
        exhausted: retries >= max_retries,
    })
}

/// Reverts in-flight rows to their queueable predecessors. With a cutoff,
/// only claims older than it are touched; without one, all of them.
fn revert_in_flight(conn: &Connection, cutoff: Option<&str>) -> Result<usize> {
    let age_clause = match cutoff {
        Some(_) => "AND (dispatched_at IS NULL OR dispatched_at < ?1)",
        None => "",
    };
    let run = |sql: String| -> Result<usize> {
        let changed = match cutoff {
            Some(cutoff) => conn.execute(&sql, params![cutoff])?,
            None => conn.execute(&sql, [])?,
        };
        Ok(changed)
    };

    let mut released = 0;
    released += run(format!(
        "UPDATE urls SET status = '', dispatched_at = NULL WHERE status = 'dispatched' {age_clause}"
    ))?;
    released += run(format!(
        "UPDATE urls SET status = 'fetched' WHERE status = 'parsing' {age_clause}"
    ))?;
    // Indexing reverts at both levels: the tunebook claim and the URL.
    run(format!(
        "UPDATE tunebooks SET status = '', dispatched_at = NULL WHERE status = 'indexing' {age_clause}"
    ))?;
    released += run(format!(
        "UPDATE urls SET status = 'parsed', dispatched_at = NULL WHERE status = 'indexing' {age_clause}"
    ))?;
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("http://h/x.abc").as_deref(), Some(".abc"));
        assert_eq!(url_extension("http://h/x.ABC").as_deref(), Some(".abc"));
        assert_eq!(
            url_extension("http://h/tunes/reel.abc?v=1").as_deref(),
            Some(".abc")
        );
        assert_eq!(url_extension("http://h/plain"), None);
        assert_eq!(url_extension("http://h/dir.d/plain"), None);
    }

    #[test]
    fn test_extract_host_lowercases() {
        assert_eq!(
            extract_host("http://Example.COM/x").as_deref(),
            Some("example.com")
        );
        assert_eq!(extract_host("not a url"), None);
    }

    #[test]
    fn test_insert_url_deduplicates() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.insert_url("http://h1/a", 0, t0()).unwrap());
        assert!(!store.insert_url("http://h1/a", 0, t0()).unwrap());
    }

    #[test]
    fn test_insert_url_rejects_non_http() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.insert_url("ftp://h1/a", 0, t0()).unwrap());
        assert!(!store.insert_url("mailto:x@y", 0, t0()).unwrap());
    }

    #[test]
    fn test_claim_next_fetch_oldest_first() {
        let store = Store::open_in_memory().unwrap();
        store.insert_url("http://h1/a", 0, t0()).unwrap();
        store.insert_url("http://h2/b", 0, t0() + secs(1)).unwrap();

        let claim = store
            .claim_next_fetch(t0() + secs(60), secs(30), ".abc")
            .unwrap()
            .unwrap();
        assert_eq!(claim.url, "http://h1/a");

        let row = store.url_by_id(claim.id).unwrap().unwrap();
        assert_eq!(row.status, UrlStatus::Dispatched);
        assert!(row.dispatched_at.is_some());
    }

    #[test]
    fn test_claim_prefers_abc_extension_regardless_of_age() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..20 {
            store
                .insert_url(&format!("http://h{i}/page{i}.html"), 0, t0())
                .unwrap();
        }
        // Enqueued much later, but on the ABC tier.
        store
            .insert_url("http://habc/reel.abc", 0, t0() + secs(100))
            .unwrap();

        let claim = store
            .claim_next_fetch(t0() + secs(200), secs(30), ".abc")
            .unwrap()
            .unwrap();
        assert_eq!(claim.url, "http://habc/reel.abc");
    }

    #[test]
    fn test_claim_reserves_host_cooldown() {
        let store = Store::open_in_memory().unwrap();
        store.insert_url("http://h1/a", 0, t0()).unwrap();
        store.insert_url("http://h1/b", 0, t0()).unwrap();
        store.insert_url("http://h2/c", 0, t0()).unwrap();

        let first = store
            .claim_next_fetch(t0() + secs(60), secs(30), ".abc")
            .unwrap()
            .unwrap();
        assert_eq!(first.url, "http://h1/a");

        // h1 is now inside its cooldown window; the second claim must
        // skip to h2 instead of handing out http://h1/b.
        let second = store
            .claim_next_fetch(t0() + secs(60), secs(30), ".abc")
            .unwrap()
            .unwrap();
        assert_eq!(second.url, "http://h2/c");

        // Nothing else is eligible until the cooldown expires.
        assert!(store
            .claim_next_fetch(t0() + secs(61), secs(30), ".abc")
            .unwrap()
            .is_none());

        // After the cooldown, h1/b becomes claimable again.
        let third = store
            .claim_next_fetch(t0() + secs(91), secs(30), ".abc")
            .unwrap()
            .unwrap();
        assert_eq!(third.url, "http://h1/b");
    }

    #[test]
    fn test_claim_skips_disabled_host() {
        let store = Store::open_in_memory().unwrap();
        store.insert_url("http://bad/a", 0, t0()).unwrap();
        store.insert_url("http://good/b", 0, t0()).unwrap();
        store.host_disable("bad", "dns", t0()).unwrap();

        let claim = store
            .claim_next_fetch(t0() + secs(60), secs(30), ".abc")
            .unwrap()
            .unwrap();
        assert_eq!(claim.url, "http://good/b");
    }

    #[test]
    fn test_fetch_success_inserts_links_one_hop_further() {
        let store = Store::open_in_memory().unwrap();
        store.refuse_extension("zip").unwrap();
        store.insert_url("http://h1/a", 2, t0()).unwrap();
        let claim = store
            .claim_next_fetch(t0() + secs(60), secs(30), ".abc")
            .unwrap()
            .unwrap();

        let links = vec![
            "http://h1/next".to_string(),
            "http://h1/a".to_string(), // already known, ignored
            "http://h1/bundle.zip".to_string(), // refused extension
            "javascript:void(0)".to_string(),
        ];
        let inserted = store
            .apply_fetch_success(
                claim.id,
                200,
                Some("text/html"),
                b"<html></html>",
                &links,
                t0() + secs(61),
            )
            .unwrap();
        assert_eq!(inserted, 1);

        let row = store.url_by_id(claim.id).unwrap().unwrap();
        assert_eq!(row.status, UrlStatus::Fetched);
        assert_eq!(row.http_status, Some(200));
        assert_eq!(row.retries, 0);

        let child_distance: u32 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT link_distance FROM urls WHERE url = 'http://h1/next'",
                    [],
                    |row| row.get(0),
                )
                .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(child_distance, 3);

        let host = store.host_by_name("h1").unwrap().unwrap();
        assert_eq!(host.downloads, 1);
        assert_eq!(host.last_http_status, Some(200));
    }

    #[test]
    fn test_retry_ladder_reverts_then_errors() {
        let store = Store::open_in_memory().unwrap();
        store.insert_url("http://h/x", 0, t0()).unwrap();

        for attempt in 1..=3u32 {
            let claim = store
                .claim_next_fetch(t0() + secs(attempt as i64 * 60), secs(30), ".abc")
                .unwrap()
                .unwrap();
            let disposition = store
                .apply_fetch_retry(claim.id, None, 3, t0() + secs(attempt as i64 * 60 + 1))
                .unwrap();
            assert_eq!(disposition.retries, attempt);
            assert_eq!(disposition.exhausted, attempt == 3);

            let row = store.url_by_id(claim.id).unwrap().unwrap();
            if attempt < 3 {
                assert_eq!(row.status, UrlStatus::New);
            } else {
                assert_eq!(row.status, UrlStatus::Error);
            }
        }
    }

    #[test]
    fn test_fetch_terminal_skips_ladder() {
        let store = Store::open_in_memory().unwrap();
        store.insert_url("http://h/gone", 0, t0()).unwrap();
        let claim = store
            .claim_next_fetch(t0() + secs(60), secs(30), ".abc")
            .unwrap()
            .unwrap();
        store
            .apply_fetch_terminal(claim.id, Some(404), t0() + secs(61))
            .unwrap();

        let row = store.url_by_id(claim.id).unwrap().unwrap();
        assert_eq!(row.status, UrlStatus::Error);
        assert_eq!(row.retries, 0);
        assert_eq!(row.http_status, Some(404));
    }

    #[test]
    fn test_revert_dispatched_keeps_retries() {
        let store = Store::open_in_memory().unwrap();
        store.insert_url("http://h/x", 0, t0()).unwrap();
        let claim = store
            .claim_next_fetch(t0() + secs(60), secs(30), ".abc")
            .unwrap()
            .unwrap();
        store.revert_dispatched(claim.id).unwrap();

        let row = store.url_by_id(claim.id).unwrap().unwrap();
        assert_eq!(row.status, UrlStatus::New);
        assert_eq!(row.retries, 0);
        assert!(row.dispatched_at.is_none());
    }

    #[test]
    fn test_claim_next_parse_returns_document() {
        let store = Store::open_in_memory().unwrap();
        store.insert_url("http://h/x.abc", 0, t0()).unwrap();
        let claim = store
            .claim_next_fetch(t0() + secs(60), secs(30), ".abc")
            .unwrap()
            .unwrap();
        store
            .apply_fetch_success(
                claim.id,
                200,
                Some("text/vnd.abc"),
                b"X:1\nT:Reel\nK:Gmaj\nABC",
                &[],
                t0() + secs(61),
            )
            .unwrap();

        let parse = store.claim_next_parse(t0() + secs(62)).unwrap().unwrap();
        assert_eq!(parse.id, claim.id);
        assert_eq!(parse.document, b"X:1\nT:Reel\nK:Gmaj\nABC");
        assert_eq!(
            store.url_by_id(claim.id).unwrap().unwrap().status,
            UrlStatus::Parsing
        );
        assert!(store.claim_next_parse(t0() + secs(63)).unwrap().is_none());
    }

    #[test]
    fn test_reset_on_startup_reverts_all_in_flight() {
        let store = Store::open_in_memory().unwrap();
        store.insert_url("http://h1/a", 0, t0()).unwrap();
        let claim = store
            .claim_next_fetch(t0() + secs(60), secs(30), ".abc")
            .unwrap()
            .unwrap();
        assert_eq!(
            store.url_by_id(claim.id).unwrap().unwrap().status,
            UrlStatus::Dispatched
        );

        let released = store.reset_on_startup().unwrap();
        assert_eq!(released, 1);
        let row = store.url_by_id(claim.id).unwrap().unwrap();
        assert_eq!(row.status, UrlStatus::New);

        // The reverted row is claimable again.
        assert!(store
            .claim_next_fetch(t0() + secs(120), secs(30), ".abc")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_release_stuck_honors_ttl() {
        let store = Store::open_in_memory().unwrap();
        store.insert_url("http://h1/a", 0, t0()).unwrap();
        let claim = store
            .claim_next_fetch(t0(), secs(30), ".abc")
            .unwrap()
            .unwrap();

        // Claim is 5 seconds old: nothing to release.
        assert_eq!(store.release_stuck(t0() + secs(5), secs(120)).unwrap(), 0);
        assert_eq!(
            store.url_by_id(claim.id).unwrap().unwrap().status,
            UrlStatus::Dispatched
        );

        // Claim is 121 seconds old: reverted.
        assert_eq!(store.release_stuck(t0() + secs(121), secs(120)).unwrap(), 1);
        assert_eq!(
            store.url_by_id(claim.id).unwrap().unwrap().status,
            UrlStatus::New
        );
    }

    #[test]
    fn test_erase_parsed_documents() {
        let store = Store::open_in_memory().unwrap();
        store.insert_url("http://h/x", 0, t0()).unwrap();
        let claim = store
            .claim_next_fetch(t0() + secs(60), secs(30), ".abc")
            .unwrap()
            .unwrap();
        store
            .apply_fetch_success(claim.id, 200, Some("text/html"), b"<p>no abc</p>", &[], t0())
            .unwrap();
        let parse = store.claim_next_parse(t0() + secs(61)).unwrap().unwrap();
        store
            .apply_parse_result(parse.id, &parse.url, &[], t0() + secs(62))
            .unwrap();

        assert_eq!(store.erase_parsed_documents().unwrap(), 1);
        // Idempotent: already-erased rows are not touched again.
        assert_eq!(store.erase_parsed_documents().unwrap(), 0);

        let row = store.url_by_id(claim.id).unwrap().unwrap();
        assert!(row.erased);
        assert_eq!(row.size_bytes, Some(0));
    }
}
