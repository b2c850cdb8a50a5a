//! Worker wire protocol.
//!
//! Workers talk to the dispatcher over a persistent TCP connection using
//! length-framed JSON: each frame is a 4-byte big-endian payload length
//! followed by one JSON object. The message sets are closed tagged
//! variants carrying an envelope version; unknown tags and foreign
//! versions are rejected at decode time.
//!
//! A connection carries exactly one worker role, declared in the first
//! (`hello`) message, and at most one in-flight assignment at a time.

mod codec;
mod message;

pub use codec::{read_message, write_message, MAX_FRAME_LEN};
pub use message::{
    decode_document, encode_document, AssignmentPayload, DispatcherMessage, FailureKind,
    FetchOutcome, IndexOutcome, ParseOutcome, TuneIntervals, WorkOutcome, WorkerFailure,
    WorkerMessage, WorkerRole, DEFAULT_PORT, PROTOCOL_VERSION,
};

use thiserror::Error;

/// Errors on the worker socket.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge { len: usize },

    #[error("unsupported protocol version {got} (expected {PROTOCOL_VERSION})")]
    Version { got: u32 },

    #[error("bad document encoding: {0}")]
    Base64(#[from] base64::DecodeError),
}
