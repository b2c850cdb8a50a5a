//! Shared worker lifecycle.
//!
//! The runner loops: connect → `hello` → { `request`; receive `assign` or
//! `idle`; execute; `result` } until told to shut down. Transport errors
//! tear the session down and reconnect with exponential backoff capped at
//! 30 seconds. On cancellation (SIGTERM) the in-flight assignment is
//! finished and its result sent before exiting; a hard kill is recovered
//! by the dispatcher's liveness sweep instead.

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{
    read_message, write_message, AssignmentPayload, DispatcherMessage, ProtocolError, WorkOutcome,
    WorkerMessage, WorkerRole,
};

/// Maximum reconnect backoff.
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Delay before reconnecting after a clean disconnect.
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// One worker role's execution logic.
pub trait RoleExecutor: Send + Sync {
    /// The role this executor serves, declared in the `hello`.
    fn role(&self) -> WorkerRole;

    /// Performs one assignment. Must not panic; failures are reported
    /// through the outcome's error field.
    fn execute(&self, payload: AssignmentPayload) -> impl Future<Output = WorkOutcome> + Send;
}

/// Worker connection settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Dispatcher address, e.g. `127.0.0.1:8888`.
    pub dispatcher_addr: String,
    /// Identifier reported in the `hello`.
    pub worker_id: String,
}

/// How a session ended.
enum SessionEnd {
    /// The dispatcher said `shutdown`, or cancellation fired.
    Shutdown,
    /// The dispatcher went away; reconnect.
    Disconnected,
}

/// Generic worker loop around a [`RoleExecutor`].
pub struct WorkerRunner<E: RoleExecutor> {
    config: WorkerConfig,
    executor: E,
}

impl<E: RoleExecutor> WorkerRunner<E> {
    pub fn new(config: WorkerConfig, executor: E) -> Self {
        Self { config, executor }
    }

    /// Runs until the dispatcher shuts the worker down or `shutdown` is
    /// cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let role = self.executor.role();
        info!(%role, id = %self.config.worker_id, addr = %self.config.dispatcher_addr,
              "Worker started");

        let mut consecutive_errors: u32 = 0;
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.session(&shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Disconnected) => {
                    consecutive_errors = 0;
                    debug!(%role, "Dispatcher went away; reconnecting");
                    if sleep_or_cancel(RECONNECT_BASE_DELAY, &shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff = calculate_backoff(consecutive_errors);
                    warn!(%role, error = %e, backoff_secs = backoff.as_secs(),
                          "Session failed; backing off");
                    if sleep_or_cancel(backoff, &shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(%role, id = %self.config.worker_id, "Worker stopped");
    }

    /// One connected session: hello, then the request loop.
    async fn session(&self, shutdown: &CancellationToken) -> Result<SessionEnd, ProtocolError> {
        let stream = TcpStream::connect(&self.config.dispatcher_addr).await?;
        let (mut reader, mut writer) = stream.into_split();

        write_message(
            &mut writer,
            &WorkerMessage::Hello {
                role: self.executor.role(),
                id: self.config.worker_id.clone(),
            },
        )
        .await?;

        loop {
            if shutdown.is_cancelled() {
                return Ok(SessionEnd::Shutdown);
            }

            write_message(&mut writer, &WorkerMessage::Request).await?;
            let Some(msg) = read_message::<_, DispatcherMessage>(&mut reader).await? else {
                return Ok(SessionEnd::Disconnected);
            };

            match msg {
                DispatcherMessage::Assign {
                    assignment_id,
                    payload,
                } => {
                    debug!(assignment_id, "Assignment received");
                    // Cancellation is honored after the in-flight
                    // assignment completes and its result is delivered.
                    let outcome = self.executor.execute(payload).await;
                    write_message(
                        &mut writer,
                        &WorkerMessage::Result {
                            assignment_id,
                            outcome,
                        },
                    )
                    .await?;
                }

                DispatcherMessage::Idle { backoff_ms } => {
                    if sleep_or_cancel(Duration::from_millis(backoff_ms), shutdown).await {
                        return Ok(SessionEnd::Shutdown);
                    }
                }

                DispatcherMessage::Shutdown => {
                    info!("Dispatcher requested shutdown");
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }
}

/// Sleeps unless cancelled first; returns true on cancellation.
async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Exponential backoff: 2^n seconds, capped at [`MAX_RECONNECT_BACKOFF`].
fn calculate_backoff(consecutive_errors: u32) -> Duration {
    let secs = 2u64.saturating_pow(consecutive_errors.min(10));
    Duration::from_secs(secs).min(MAX_RECONNECT_BACKOFF)
}
