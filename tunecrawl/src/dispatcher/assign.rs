//! Assignment building: claim the best eligible row for a requesting
//! worker and send it an `assign`, or an `idle` hint when nothing is
//! eligible.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{encode_document, AssignmentPayload, DispatcherMessage, WorkerRole};

use super::core::{with_store_retry, ConnId, Dispatcher, WorkRef};

impl Dispatcher {
    /// Handles a worker's `request`: claims per its role and replies with
    /// `assign` or `idle`.
    ///
    /// Selection is implemented inside the store's claim statements as a
    /// single transactional read-and-update, so no candidate is ever
    /// chosen twice.
    pub(crate) async fn assign_work(&mut self, conn: ConnId, shutdown: &CancellationToken) {
        let Some(worker) = self.workers.get(&conn) else {
            return;
        };
        let Some(role) = worker.role else {
            warn!(conn, "Request before hello; ignoring");
            return;
        };
        if worker.in_flight.is_some() {
            warn!(conn, "Request with an assignment already in flight; ignoring");
            return;
        }
        let reply_tx = worker.reply_tx.clone();

        let store = Arc::clone(&self.store);
        let now = Utc::now();
        let claimed = match role {
            WorkerRole::Fetcher => {
                let cooldown = self.policy.cooldown();
                let extension = self.config.abc_priority_extension.clone();
                with_store_retry(shutdown, "claim_next_fetch", || {
                    store.claim_next_fetch(now, cooldown, &extension)
                })
                .await
                .flatten()
                .map(|claim| {
                    (
                        WorkRef::Fetch {
                            url_id: claim.id,
                            host: claim.host,
                        },
                        AssignmentPayload::Fetch {
                            url_id: claim.id,
                            url: claim.url,
                        },
                    )
                })
            }

            WorkerRole::Parser => {
                with_store_retry(shutdown, "claim_next_parse", || store.claim_next_parse(now))
                    .await
                    .flatten()
                    .map(|claim| {
                        (
                            WorkRef::Parse {
                                url_id: claim.id,
                                url: claim.url.clone(),
                            },
                            AssignmentPayload::Parse {
                                url_id: claim.id,
                                url: claim.url,
                                mime_type: claim.mime_type,
                                document: encode_document(&claim.document),
                            },
                        )
                    })
            }

            WorkerRole::Indexer => {
                with_store_retry(shutdown, "claim_next_tunebook", || {
                    store.claim_next_tunebook(now)
                })
                .await
                .flatten()
                .map(|claim| {
                    (
                        WorkRef::Index {
                            tunebook_id: claim.tunebook_id,
                            url_id: claim.url_id,
                        },
                        AssignmentPayload::Index {
                            tunebook_id: claim.tunebook_id,
                            tunes: claim.tunes,
                        },
                    )
                })
            }
        };

        let reply = match claimed {
            Some((work, payload)) => {
                let assignment_id = self.next_assignment_id;
                self.next_assignment_id += 1;

                if let Some(worker) = self.workers.get_mut(&conn) {
                    worker.in_flight = Some((assignment_id, work));
                }
                debug!(conn, assignment_id, %role, "Assignment sent");
                DispatcherMessage::Assign {
                    assignment_id,
                    payload,
                }
            }
            None => DispatcherMessage::Idle {
                backoff_ms: self.config.idle_backoff_ms,
            },
        };

        if reply_tx.send(reply).await.is_err() {
            // The connection died between request and reply. Any claim we
            // just made is reclaimed by the liveness sweep.
            if let Some(worker) = self.workers.get_mut(&conn) {
                worker.in_flight = None;
            }
            debug!(conn, "Reply channel closed before assignment delivery");
        }
    }
}
