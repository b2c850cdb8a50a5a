//! Result application.
//!
//! The dispatcher is the sole author of user-visible state: worker
//! results only report what happened, and everything the store learns
//! about it is decided here — success transitions, the retry ladder,
//! host accounting, and host disabling.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::policy::{REASON_DNS, REASON_TIMEOUT};
use crate::protocol::{
    decode_document, FailureKind, FetchOutcome, IndexOutcome, ParseOutcome, WorkOutcome,
    WorkerFailure,
};

use super::core::{with_store_retry, Dispatcher, WorkRef};

impl Dispatcher {
    /// Applies a validated result to the store.
    pub(crate) async fn apply_result(
        &mut self,
        work: WorkRef,
        outcome: WorkOutcome,
        shutdown: &CancellationToken,
    ) {
        match (work, outcome) {
            (WorkRef::Fetch { url_id, host }, WorkOutcome::Fetch(outcome)) => {
                self.apply_fetch(url_id, host, outcome, shutdown).await;
            }
            (WorkRef::Parse { url_id, url }, WorkOutcome::Parse(outcome)) => {
                self.apply_parse(url_id, url, outcome, shutdown).await;
            }
            (WorkRef::Index { tunebook_id, url_id }, WorkOutcome::Index(outcome)) => {
                self.apply_index(tunebook_id, url_id, outcome, shutdown).await;
            }
            (work, _) => {
                // The row stays in flight; the liveness sweep reclaims it.
                warn!(?work, "Result kind does not match the assignment; dropping");
            }
        }
    }

    async fn apply_fetch(
        &mut self,
        url_id: i64,
        host: Option<String>,
        outcome: FetchOutcome,
        shutdown: &CancellationToken,
    ) {
        let store = Arc::clone(&self.store);
        let now = Utc::now();
        let max_retries = self.config.max_retries;

        if let Some(failure) = &outcome.error {
            self.apply_fetch_failure(url_id, host, failure, outcome.http_status, shutdown)
                .await;
            return;
        }

        let body = match decode_document(&outcome.document) {
            Ok(body) => body,
            Err(e) => {
                warn!(url_id, error = %e, "Undecodable fetch result; counting as a retry");
                with_store_retry(shutdown, "apply_fetch_retry", || {
                    store.apply_fetch_retry(url_id, outcome.http_status, max_retries, now)
                })
                .await;
                return;
            }
        };

        let http_status = outcome.http_status.unwrap_or(200);
        let inserted = with_store_retry(shutdown, "apply_fetch_success", || {
            store.apply_fetch_success(
                url_id,
                http_status,
                outcome.mime_type.as_deref(),
                &body,
                &outcome.links,
                now,
            )
        })
        .await;

        if let Some(host) = &host {
            self.policy.record_success(host);
        }
        debug!(
            url_id,
            http_status,
            size = body.len(),
            new_links = inserted.unwrap_or(0),
            "Fetch applied"
        );
    }

    async fn apply_fetch_failure(
        &mut self,
        url_id: i64,
        host: Option<String>,
        failure: &WorkerFailure,
        http_status: Option<u16>,
        shutdown: &CancellationToken,
    ) {
        let store = Arc::clone(&self.store);
        let now = Utc::now();
        let max_retries = self.config.max_retries;

        match failure.kind {
            FailureKind::Dns => {
                // The host is unreachable for everyone: disable it and put
                // the URL back without burning a retry. The purger cleans
                // both up.
                with_store_retry(shutdown, "revert_dispatched", || {
                    store.revert_dispatched(url_id)
                })
                .await;
                if let Some(host) = &host {
                    if let Some(true) = with_store_retry(shutdown, "host_disable", || {
                        store.host_disable(host, REASON_DNS, now)
                    })
                    .await
                    {
                        info!(%host, detail = %failure.detail, "Host disabled (dns)");
                    }
                    self.policy.forget(host);
                }
            }

            FailureKind::Http if matches!(http_status, Some(400..=499)) => {
                with_store_retry(shutdown, "apply_fetch_terminal", || {
                    store.apply_fetch_terminal(url_id, http_status, now)
                })
                .await;
                if let Some(host) = &host {
                    with_store_retry(shutdown, "host_touch", || {
                        store.host_touch(host, http_status, now)
                    })
                    .await;
                    // A 4xx proves the host itself is alive.
                    self.policy.record_success(host);
                }
                debug!(url_id, ?http_status, "Fetch failed terminally");
            }

            kind => {
                let disposition = with_store_retry(shutdown, "apply_fetch_retry", || {
                    store.apply_fetch_retry(url_id, http_status, max_retries, now)
                })
                .await;
                if let Some(disposition) = disposition {
                    debug!(
                        url_id,
                        ?kind,
                        retries = disposition.retries,
                        exhausted = disposition.exhausted,
                        "Fetch failed transiently"
                    );
                }

                if let Some(host) = &host {
                    with_store_retry(shutdown, "host_touch", || {
                        store.host_touch(host, http_status, now)
                    })
                    .await;
                    if kind == FailureKind::Timeout && self.policy.record_timeout(host) {
                        if let Some(true) = with_store_retry(shutdown, "host_disable", || {
                            store.host_disable(host, REASON_TIMEOUT, now)
                        })
                        .await
                        {
                            info!(%host, "Host disabled (timeout streak)");
                        }
                    }
                }
            }
        }
    }

    async fn apply_parse(
        &mut self,
        url_id: i64,
        url: String,
        outcome: ParseOutcome,
        shutdown: &CancellationToken,
    ) {
        let store = Arc::clone(&self.store);
        let now = Utc::now();
        let max_retries = self.config.max_retries;

        if let Some(failure) = &outcome.error {
            let disposition = with_store_retry(shutdown, "apply_parse_retry", || {
                store.apply_parse_retry(url_id, max_retries, now)
            })
            .await;
            if let Some(disposition) = disposition {
                // A parser failure never blames the host.
                warn!(
                    url_id,
                    kind = ?failure.kind,
                    retries = disposition.retries,
                    exhausted = disposition.exhausted,
                    "Parse failed"
                );
            }
            return;
        }

        let applied = with_store_retry(shutdown, "apply_parse_result", || {
            store.apply_parse_result(url_id, &url, &outcome.tunes, now)
        })
        .await;
        if let Some(applied) = applied {
            info!(
                url_id,
                tunes = outcome.tunes.len(),
                tunebook_id = applied.tunebook_id,
                "Parse applied"
            );
        }
    }

    async fn apply_index(
        &mut self,
        tunebook_id: i64,
        url_id: i64,
        outcome: IndexOutcome,
        shutdown: &CancellationToken,
    ) {
        let store = Arc::clone(&self.store);
        let now = Utc::now();
        let max_retries = self.config.max_retries;

        if let Some(failure) = &outcome.error {
            let disposition = with_store_retry(shutdown, "apply_index_retry", || {
                store.apply_index_retry(tunebook_id, max_retries, now)
            })
            .await;
            if let Some(disposition) = disposition {
                warn!(
                    tunebook_id,
                    url_id,
                    kind = ?failure.kind,
                    retries = disposition.retries,
                    exhausted = disposition.exhausted,
                    "Index failed"
                );
            }
            return;
        }

        let intervals: Vec<(i64, String)> = outcome
            .intervals
            .into_iter()
            .map(|t| (t.tune_id, t.intervals))
            .collect();
        let advanced = with_store_retry(shutdown, "apply_index_result", || {
            store.apply_index_result(tunebook_id, &intervals, now)
        })
        .await;
        if let Some(advanced) = advanced {
            info!(
                tunebook_id,
                url_id,
                tunes = intervals.len(),
                url_indexed = advanced,
                "Index applied"
            );
        }
    }
}
