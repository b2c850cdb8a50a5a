//! Tunebook and tune persistence: parse results, index claims, interval
//! writes.
//!
//! A tunebook is created once per source URL that yielded any tune
//! (`tunebooks.url` is UNIQUE, which makes parse-result replay
//! idempotent). The indexer works at tunebook granularity and carries its
//! own retry counter.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::abc::ParsedTune;

use super::url::RetryDisposition;
use super::{fmt_ts, Result, Store, StoreError};

/// Pipeline state of a tunebook. `New` is stored as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunebookStatus {
    New,
    Indexing,
    Indexed,
    Error,
}

impl TunebookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunebookStatus::New => "",
            TunebookStatus::Indexing => "indexing",
            TunebookStatus::Indexed => "indexed",
            TunebookStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "" => Ok(TunebookStatus::New),
            "indexing" => Ok(TunebookStatus::Indexing),
            "indexed" => Ok(TunebookStatus::Indexed),
            "error" => Ok(TunebookStatus::Error),
            other => Err(StoreError::Corrupt(format!(
                "unknown tunebook status '{other}'"
            ))),
        }
    }
}

/// Result of applying a parse outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseApplied {
    /// The tunebook the tunes landed in, when any tunes were found.
    pub tunebook_id: Option<i64>,
    /// Zero when the tunebook already existed (replay).
    pub tunes_inserted: usize,
}

/// Pitch string of one tune, as handed to an indexer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TunePitches {
    pub tune_id: i64,
    pub pitches: String,
}

/// A tunebook claimed for indexing.
#[derive(Debug, Clone)]
pub struct TunebookClaim {
    pub tunebook_id: i64,
    pub url_id: i64,
    pub url: String,
    pub tunes: Vec<TunePitches>,
}

/// Outcome of an indexer retry-ladder step.
pub type IndexDisposition = RetryDisposition;

impl Store {
    /// Applies a parser result: inserts the tunebook and its tunes in one
    /// transaction and advances the URL from `parsing` to `parsed` with
    /// `has_abc` reflecting whether any tune was found.
    ///
    /// Replay-safe: a duplicate tunebook insert short-circuits on the
    /// UNIQUE url and leaves existing tunes untouched.
    pub fn apply_parse_result(
        &self,
        url_id: i64,
        url: &str,
        tunes: &[ParsedTune],
        now: DateTime<Utc>,
    ) -> Result<ParseApplied> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mut applied = ParseApplied {
                tunebook_id: None,
                tunes_inserted: 0,
            };

            if !tunes.is_empty() {
                let created = tx.execute(
                    "INSERT OR IGNORE INTO tunebooks (url, url_id, created_at) VALUES (?1, ?2, ?3)",
                    params![url, url_id, fmt_ts(now)],
                )?;
                let tunebook_id: i64 = tx.query_row(
                    "SELECT id FROM tunebooks WHERE url = ?1",
                    params![url],
                    |row| row.get(0),
                )?;
                applied.tunebook_id = Some(tunebook_id);

                if created > 0 {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT INTO tunes (
                            tunebook_id, reference_number, title, composer, origin,
                            area, meter, unit_note_length, tempo, parts,
                            transcription, notes, tune_group, history, key,
                            rhythm, book, discography, source, instruction,
                            tune_body, pitches
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                                  ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20,
                                  ?21, ?22)
                        "#,
                    )?;
                    for tune in tunes {
                        stmt.execute(params![
                            tunebook_id,
                            tune.reference_number,
                            tune.title,
                            tune.composer,
                            tune.origin,
                            tune.area,
                            tune.meter,
                            tune.unit_note_length,
                            tune.tempo,
                            tune.parts,
                            tune.transcription,
                            tune.notes,
                            tune.group,
                            tune.history,
                            tune.key,
                            tune.rhythm,
                            tune.book,
                            tune.discography,
                            tune.source,
                            tune.instruction,
                            tune.tune_body,
                            tune.pitches,
                        ])?;
                        applied.tunes_inserted += 1;
                    }
                }
            }

            tx.execute(
                "UPDATE urls SET status = 'parsed', has_abc = ?1 WHERE id = ?2",
                params![!tunes.is_empty(), url_id],
            )?;
            tx.commit()?;
            Ok(applied)
        })
    }

    /// Claims the oldest queueable tunebook for an indexer, flipping both
    /// the tunebook and its URL to `indexing`.
    pub fn claim_next_tunebook(&self, now: DateTime<Utc>) -> Result<Option<TunebookClaim>> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let claimed = tx
                .query_row(
                    r#"
                    UPDATE tunebooks SET status = 'indexing', dispatched_at = ?1
                    WHERE id = (
                        SELECT id FROM tunebooks WHERE status = ''
                        ORDER BY created_at ASC, id ASC
                        LIMIT 1
                    )
                    RETURNING id, url_id, url
                    "#,
                    params![fmt_ts(now)],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((tunebook_id, url_id, url)) = claimed else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute(
                "UPDATE urls SET status = 'indexing', dispatched_at = ?1 \
                 WHERE id = ?2 AND status = 'parsed'",
                params![fmt_ts(now), url_id],
            )?;

            let mut stmt =
                tx.prepare("SELECT id, pitches FROM tunes WHERE tunebook_id = ?1 ORDER BY id")?;
            let tunes = stmt
                .query_map(params![tunebook_id], |row| {
                    Ok(TunePitches {
                        tune_id: row.get(0)?,
                        pitches: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);
            tx.commit()?;

            Ok(Some(TunebookClaim {
                tunebook_id,
                url_id,
                url,
                tunes,
            }))
        })
    }

    /// Applies an indexer result: writes each tune's interval vector,
    /// marks the tunebook `indexed`, and advances the URL to `indexed`
    /// once every tunebook of that URL is indexed.
    ///
    /// Idempotent: re-applying the same vectors leaves the store
    /// unchanged. Returns whether the URL reached `indexed`.
    pub fn apply_index_result(
        &self,
        tunebook_id: i64,
        intervals: &[(i64, String)],
        _now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for (tune_id, vector) in intervals {
                tx.execute(
                    "UPDATE tunes SET intervals = ?1 WHERE id = ?2 AND tunebook_id = ?3",
                    params![vector, tune_id, tunebook_id],
                )?;
            }

            let url_id: i64 = tx.query_row(
                "SELECT url_id FROM tunebooks WHERE id = ?1",
                params![tunebook_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE tunebooks SET status = 'indexed', retries = 0, dispatched_at = NULL \
                 WHERE id = ?1",
                params![tunebook_id],
            )?;

            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM tunebooks WHERE url_id = ?1 AND status != 'indexed'",
                params![url_id],
                |row| row.get(0),
            )?;
            let mut advanced = false;
            if remaining == 0 {
                advanced = tx.execute(
                    "UPDATE urls SET status = 'indexed', dispatched_at = NULL \
                     WHERE id = ?1 AND status = 'indexing'",
                    params![url_id],
                )? > 0;
            }
            tx.commit()?;
            Ok(advanced)
        })
    }

    /// One retry-ladder step for an indexer failure, at tunebook
    /// granularity. Below the bound the tunebook reverts to queueable and
    /// the URL to `parsed`; at the bound both go to `error`.
    pub fn apply_index_retry(
        &self,
        tunebook_id: i64,
        max_retries: u32,
        _now: DateTime<Utc>,
    ) -> Result<IndexDisposition> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "UPDATE tunebooks SET retries = retries + 1 WHERE id = ?1",
                params![tunebook_id],
            )?;
            let (retries, url_id): (u32, i64) = tx.query_row(
                "SELECT retries, url_id FROM tunebooks WHERE id = ?1",
                params![tunebook_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let exhausted = retries >= max_retries;
            if exhausted {
                tx.execute(
                    "UPDATE tunebooks SET status = 'error', dispatched_at = NULL WHERE id = ?1",
                    params![tunebook_id],
                )?;
                tx.execute(
                    "UPDATE urls SET status = 'error', dispatched_at = NULL \
                     WHERE id = ?1 AND status = 'indexing'",
                    params![url_id],
                )?;
            } else {
                tx.execute(
                    "UPDATE tunebooks SET status = '', dispatched_at = NULL WHERE id = ?1",
                    params![tunebook_id],
                )?;
                tx.execute(
                    "UPDATE urls SET status = 'parsed', dispatched_at = NULL \
                     WHERE id = ?1 AND status = 'indexing'",
                    params![url_id],
                )?;
            }
            tx.commit()?;
            Ok(IndexDisposition { retries, exhausted })
        })
    }

    /// Status and retry count of one tunebook.
    pub fn tunebook_state(&self, tunebook_id: i64) -> Result<Option<(TunebookStatus, u32)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT status, retries FROM tunebooks WHERE id = ?1",
                params![tunebook_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()?
            .map(|(status, retries)| Ok((TunebookStatus::parse(&status)?, retries)))
            .transpose()
        })
    }

    /// Stored interval vector of one tune.
    pub fn tune_intervals(&self, tune_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT intervals FROM tunes WHERE id = ?1",
                params![tune_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Tunebook and tune totals for the status surface:
    /// `(tunebooks, indexed_tunebooks, tunes)`.
    pub fn tunebook_stats(&self) -> Result<(u64, u64, u64)> {
        self.with_conn(|conn| {
            let (books, indexed): (u64, u64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(status = 'indexed'), 0) FROM tunebooks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let tunes: u64 =
                conn.query_row("SELECT COUNT(*) FROM tunes", [], |row| row.get(0))?;
            Ok((books, indexed, tunes))
        })
    }
}
