//! Dispatcher core - scheduler state and run loop.
//!
//! Handler methods live in sibling modules:
//! - `assign`: claim + assignment building per worker role
//! - `results`: result application and the retry ladder
//! - `connection`: per-socket frame pump
//! - `logscan`: DNS failure detection in worker logs

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::policy::{HostPolicy, REASON_DNS};
use crate::protocol::{DispatcherMessage, WorkOutcome, WorkerRole};
use crate::store::Store;

use super::connection::{serve_connection, ConnEvent};
use super::logscan::LogScanner;
use super::DispatcherConfig;

/// Capacity of the scheduler's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of each connection's reply channel.
const REPLY_CHANNEL_CAPACITY: usize = 8;

/// Initial backoff when the store reports busy.
const STORE_RETRY_INITIAL: Duration = Duration::from_millis(500);

/// Cap on the store retry backoff.
const STORE_RETRY_MAX: Duration = Duration::from_secs(10);

pub(crate) type ConnId = u64;

/// An assignment currently held by a worker connection.
#[derive(Debug, Clone)]
pub(crate) enum WorkRef {
    Fetch {
        url_id: i64,
        host: Option<String>,
    },
    Parse {
        url_id: i64,
        url: String,
    },
    Index {
        tunebook_id: i64,
        url_id: i64,
    },
}

/// Scheduler-side view of one worker connection.
pub(crate) struct WorkerConn {
    pub role: Option<WorkerRole>,
    pub worker_id: String,
    pub reply_tx: mpsc::Sender<DispatcherMessage>,
    pub in_flight: Option<(u64, WorkRef)>,
}

/// The crawl pipeline scheduler.
///
/// Process-wide singleton by design: one instance owns the worker socket
/// and all claim/release transitions. Lifecycle is
/// `reset_on_startup → run → graceful drain on cancellation`.
pub struct Dispatcher {
    listener: TcpListener,
    pub(crate) store: Arc<Store>,
    pub(crate) config: DispatcherConfig,
    pub(crate) policy: HostPolicy,
    pub(crate) workers: HashMap<ConnId, WorkerConn>,
    next_conn_id: ConnId,
    pub(crate) next_assignment_id: u64,
    events_tx: mpsc::Sender<ConnEvent>,
    events_rx: mpsc::Receiver<ConnEvent>,
    log_scanner: LogScanner,
}

impl Dispatcher {
    /// Binds the worker socket and prepares the scheduler.
    pub async fn bind(store: Store, config: DispatcherConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", config.port)).await?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let policy = HostPolicy::new(config.cooldown_seconds, config.host_timeout_block_streak);
        let log_scanner = LogScanner::new(&config.log_directory);

        Ok(Self {
            listener,
            store: Arc::new(store),
            config,
            policy,
            workers: HashMap::new(),
            next_conn_id: 0,
            next_assignment_id: 0,
            events_tx,
            events_rx,
            log_scanner,
        })
    }

    /// The address the worker socket is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the scheduler until cancelled.
    ///
    /// Startup recovery runs before the first connection is serviced, so
    /// no orphan of a previous crash can block the queue.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let store = Arc::clone(&self.store);
        match with_store_retry(&shutdown, "reset_on_startup", || store.reset_on_startup()).await {
            Some(released) if released > 0 => {
                info!(released, "Startup recovery reverted in-flight URLs")
            }
            Some(_) => debug!("Startup recovery found nothing in flight"),
            None => {
                error!("Startup recovery failed; refusing to schedule");
                return;
            }
        }

        info!(
            port = self.local_addr().map(|a| a.port()).unwrap_or(0),
            cooldown_s = self.config.cooldown_seconds,
            ttl_s = self.config.inflight_ttl_seconds,
            "Dispatcher started"
        );

        let mut sweep = tokio::time::interval(Duration::from_secs(
            self.config.sweep_interval_seconds.max(1),
        ));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut log_scan = tokio::time::interval(Duration::from_secs(
            self.config.log_scan_interval_seconds.max(1),
        ));
        log_scan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.drain().await;
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.register_connection(stream, addr),
                        Err(e) => warn!(error = %e, "Failed to accept worker connection"),
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event, &shutdown).await;
                }

                _ = sweep.tick() => {
                    self.run_liveness_sweep(&shutdown).await;
                }

                _ = log_scan.tick() => {
                    self.run_log_scan();
                }
            }
        }

        info!("Dispatcher stopped");
    }

    fn register_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn = self.next_conn_id;
        self.next_conn_id += 1;

        let (reply_tx, reply_rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        self.workers.insert(
            conn,
            WorkerConn {
                role: None,
                worker_id: String::new(),
                reply_tx,
                in_flight: None,
            },
        );

        debug!(conn, %addr, "Worker connection accepted");
        tokio::spawn(serve_connection(conn, stream, self.events_tx.clone(), reply_rx));
    }

    async fn handle_event(&mut self, event: ConnEvent, shutdown: &CancellationToken) {
        match event {
            ConnEvent::Hello {
                conn,
                role,
                worker_id,
            } => {
                let Some(worker) = self.workers.get_mut(&conn) else {
                    return;
                };
                if worker.role.is_some() {
                    warn!(conn, "Duplicate hello; ignoring");
                    return;
                }
                worker.role = Some(role);
                worker.worker_id = worker_id;
                info!(conn, %role, id = %worker.worker_id, "Worker registered");
            }

            ConnEvent::Request { conn } => {
                self.assign_work(conn, shutdown).await;
            }

            ConnEvent::Result {
                conn,
                assignment_id,
                outcome,
            } => {
                self.accept_result(conn, assignment_id, outcome, shutdown)
                    .await;
            }

            ConnEvent::Closed { conn } => {
                if let Some(worker) = self.workers.remove(&conn) {
                    match worker.in_flight {
                        // Lost, never reassigned immediately; the liveness
                        // sweep reclaims the row after the TTL.
                        Some((assignment_id, _)) => warn!(
                            conn,
                            assignment_id,
                            "Worker disconnected with an assignment in flight"
                        ),
                        None => debug!(conn, "Worker disconnected"),
                    }
                }
            }
        }
    }

    /// Validates a result against the connection's in-flight assignment
    /// and applies it.
    async fn accept_result(
        &mut self,
        conn: ConnId,
        assignment_id: u64,
        outcome: WorkOutcome,
        shutdown: &CancellationToken,
    ) {
        let Some(worker) = self.workers.get_mut(&conn) else {
            return;
        };
        let work = match worker.in_flight.take() {
            Some((expected, work)) if expected == assignment_id => work,
            Some(other) => {
                warn!(
                    conn,
                    got = assignment_id,
                    expected = other.0,
                    "Result for a stale assignment; dropping"
                );
                worker.in_flight = Some(other);
                return;
            }
            None => {
                warn!(conn, assignment_id, "Result with nothing in flight");
                return;
            }
        };
        self.apply_result(work, outcome, shutdown).await;
    }

    /// Reverts in-flight URLs whose claim is older than the TTL.
    async fn run_liveness_sweep(&mut self, shutdown: &CancellationToken) {
        let store = Arc::clone(&self.store);
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(self.config.inflight_ttl_seconds as i64);
        if let Some(released) =
            with_store_retry(shutdown, "release_stuck", || store.release_stuck(now, ttl)).await
        {
            if released > 0 {
                info!(released, "Liveness sweep reclaimed stuck URLs");
            }
        }
    }

    /// Scans worker logs for DNS failure signatures and disables the
    /// named hosts. Advisory and idempotent; the fetcher's explicit DNS
    /// reporting is the primary path.
    fn run_log_scan(&mut self) {
        let hosts = match self.log_scanner.scan() {
            Ok(hosts) => hosts,
            Err(e) => {
                debug!(error = %e, "Log scan skipped");
                return;
            }
        };
        let now = Utc::now();
        for host in hosts {
            match self.store.host_disable(&host, REASON_DNS, now) {
                Ok(true) => {
                    info!(%host, "Log scanner disabled host (dns)");
                    self.policy.forget(&host);
                }
                Ok(false) => {}
                Err(e) => warn!(%host, error = %e, "Could not disable host from log scan"),
            }
        }
    }

    /// Graceful drain: tell every worker to shut down, then apply any
    /// results that are already queued. Unfinished assignments are
    /// recovered by the next startup.
    async fn drain(&mut self) {
        info!("Dispatcher draining");
        for worker in self.workers.values() {
            let _ = worker.reply_tx.send(DispatcherMessage::Shutdown).await;
        }

        let drain_token = CancellationToken::new();
        while let Ok(event) = self.events_rx.try_recv() {
            if let ConnEvent::Result {
                conn,
                assignment_id,
                outcome,
            } = event
            {
                self.accept_result(conn, assignment_id, outcome, &drain_token)
                    .await;
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers.len())
            .field("next_assignment_id", &self.next_assignment_id)
            .finish_non_exhaustive()
    }
}

/// Runs a store operation, backing off while the store is busy.
///
/// Scheduling pauses for the duration: the scheduler task is the only
/// caller, so nothing else mutates state while this waits. Returns `None`
/// on cancellation or a non-retryable error.
pub(crate) async fn with_store_retry<T>(
    shutdown: &CancellationToken,
    operation: &str,
    mut op: impl FnMut() -> crate::store::Result<T>,
) -> Option<T> {
    let mut backoff = STORE_RETRY_INITIAL;
    loop {
        match op() {
            Ok(value) => return Some(value),
            Err(e) if e.is_retryable() => {
                warn!(error = %e, operation, backoff_ms = backoff.as_millis() as u64,
                      "Store busy; scheduling paused");
                tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(STORE_RETRY_MAX);
            }
            Err(e) => {
                error!(error = %e, operation, "Store operation failed");
                return None;
            }
        }
    }
}
