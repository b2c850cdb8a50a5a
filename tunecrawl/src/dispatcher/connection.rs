//! Per-connection frame pump.
//!
//! Each accepted socket gets its own task that decodes worker frames into
//! scheduler events and writes queued replies back. The task never
//! touches shared state; everything funnels through the event channel.

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::protocol::{read_message, write_message, DispatcherMessage, WorkOutcome, WorkerMessage, WorkerRole};

use super::core::ConnId;

/// Events a connection task reports to the scheduler.
#[derive(Debug)]
pub(crate) enum ConnEvent {
    Hello {
        conn: ConnId,
        role: WorkerRole,
        worker_id: String,
    },
    Request {
        conn: ConnId,
    },
    Result {
        conn: ConnId,
        assignment_id: u64,
        outcome: WorkOutcome,
    },
    Closed {
        conn: ConnId,
    },
}

/// Pumps frames between one worker socket and the scheduler until the
/// peer disconnects, the protocol is violated, or a shutdown reply is
/// delivered.
pub(crate) async fn serve_connection(
    conn: ConnId,
    stream: TcpStream,
    events: mpsc::Sender<ConnEvent>,
    mut replies: mpsc::Receiver<DispatcherMessage>,
) {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        tokio::select! {
            incoming = read_message::<_, WorkerMessage>(&mut reader) => {
                match incoming {
                    Ok(Some(msg)) => {
                        let event = match msg {
                            WorkerMessage::Hello { role, id } => Some(ConnEvent::Hello {
                                conn,
                                role,
                                worker_id: id,
                            }),
                            WorkerMessage::Request => Some(ConnEvent::Request { conn }),
                            WorkerMessage::Result { assignment_id, outcome } => {
                                Some(ConnEvent::Result { conn, assignment_id, outcome })
                            }
                            WorkerMessage::Ping => {
                                trace!(conn, "Keepalive");
                                None
                            }
                        };
                        if let Some(event) = event {
                            if events.send(event).await.is_err() {
                                // Scheduler is gone; nothing left to do.
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(conn, "Worker closed the connection");
                        let _ = events.send(ConnEvent::Closed { conn }).await;
                        break;
                    }
                    Err(e) => {
                        warn!(conn, error = %e, "Dropping worker connection");
                        let _ = events.send(ConnEvent::Closed { conn }).await;
                        break;
                    }
                }
            }

            reply = replies.recv() => {
                match reply {
                    Some(msg) => {
                        let terminal = matches!(msg, DispatcherMessage::Shutdown);
                        if let Err(e) = write_message(&mut writer, &msg).await {
                            warn!(conn, error = %e, "Failed to write to worker");
                            let _ = events.send(ConnEvent::Closed { conn }).await;
                            break;
                        }
                        if terminal {
                            debug!(conn, "Shutdown delivered");
                            break;
                        }
                    }
                    // The scheduler dropped this connection's sender.
                    None => break,
                }
            }
        }
    }
}
