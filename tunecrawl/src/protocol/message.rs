//! Protocol message types.

use base64::Engine;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::abc::ParsedTune;
use crate::store::TunePitches;

use super::ProtocolError;

/// Envelope version carried by every frame.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default dispatcher listen port.
pub const DEFAULT_PORT: u16 = 8888;

/// The role a connection serves, declared in its `hello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Fetcher,
    Parser,
    Indexer,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Fetcher => "fetcher",
            WorkerRole::Parser => "parser",
            WorkerRole::Indexer => "indexer",
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Frame envelope: version plus the tagged message.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct Envelope<M> {
    pub v: u32,
    #[serde(flatten)]
    pub msg: M,
}

/// Marker for the two closed message sets. Sealed: only [`WorkerMessage`]
/// and [`DispatcherMessage`] travel on the wire.
pub trait Message: Serialize + DeserializeOwned {}

/// Worker → dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Hello {
        role: WorkerRole,
        id: String,
    },
    Request,
    Result {
        assignment_id: u64,
        outcome: WorkOutcome,
    },
    Ping,
}

impl Message for WorkerMessage {}

/// Dispatcher → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatcherMessage {
    Assign {
        assignment_id: u64,
        payload: AssignmentPayload,
    },
    Idle {
        backoff_ms: u64,
    },
    Shutdown,
}

impl Message for DispatcherMessage {}

/// What an assignment asks a worker to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssignmentPayload {
    Fetch {
        url_id: i64,
        url: String,
    },
    /// The fetched document travels inline so parsers stay stateless.
    Parse {
        url_id: i64,
        url: String,
        mime_type: Option<String>,
        document: String,
    },
    Index {
        tunebook_id: i64,
        tunes: Vec<TunePitches>,
    },
}

/// Result payload, one variant per role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkOutcome {
    Fetch(FetchOutcome),
    Parse(ParseOutcome),
    Index(IndexOutcome),
}

/// Fetcher result: the document plus extracted links, or a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub http_status: Option<u16>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    /// Base64-encoded body; empty on failure.
    #[serde(default)]
    pub document: String,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerFailure>,
}

/// Parser result: the extracted tunes (possibly none), or a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseOutcome {
    #[serde(default)]
    pub tunes: Vec<ParsedTune>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerFailure>,
}

/// Indexer result: one interval vector per tune, or a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexOutcome {
    #[serde(default)]
    pub intervals: Vec<TuneIntervals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerFailure>,
}

/// Interval vector computed for one tune.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuneIntervals {
    pub tune_id: i64,
    pub intervals: String,
}

/// A failure as reported by a worker; the dispatcher is the sole author
/// of the resulting state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl WorkerFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Failure taxonomy shared by all roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Name resolution failed; the host is unreachable for everyone.
    Dns,
    /// The request timed out.
    Timeout,
    /// Connection refused, reset, or otherwise failed mid-flight.
    Connection,
    /// An HTTP error status; `http_status` carries the code.
    Http,
    /// The input could not be processed (malformed document, bad pitches).
    Malformed,
    /// Unexpected worker-side failure.
    Internal,
}

/// Encodes document bytes for the JSON wire.
pub fn encode_document(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes a document from the JSON wire.
pub fn decode_document(encoded: &str) -> Result<Vec<u8>, ProtocolError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_message_tags() {
        let json = serde_json::to_value(&WorkerMessage::Request).unwrap();
        assert_eq!(json["type"], "request");

        let json = serde_json::to_value(&WorkerMessage::Hello {
            role: WorkerRole::Fetcher,
            id: "f1".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["role"], "fetcher");
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = serde_json::from_str::<WorkerMessage>(r#"{"type":"gossip"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_outcome_round_trip() {
        let outcome = WorkOutcome::Fetch(FetchOutcome {
            http_status: Some(200),
            mime_type: Some("text/vnd.abc".to_string()),
            size_bytes: 3,
            document: encode_document(b"ABC"),
            links: vec!["http://h/next".to_string()],
            error: None,
        });
        let json = serde_json::to_string(&outcome).unwrap();
        let back: WorkOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_failure_outcome_round_trip() {
        let outcome = WorkOutcome::Fetch(FetchOutcome {
            http_status: None,
            error: Some(WorkerFailure::new(FailureKind::Dns, "no such host")),
            ..Default::default()
        });
        let json = serde_json::to_string(&outcome).unwrap();
        let WorkOutcome::Fetch(back) = serde_json::from_str(&json).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(back.error.unwrap().kind, FailureKind::Dns);
    }

    #[test]
    fn test_document_encoding_round_trip() {
        let body = b"X:1\nT:Reel\nK:Gmaj\nABC";
        let encoded = encode_document(body);
        assert_eq!(decode_document(&encoded).unwrap(), body);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_document("not base64 !!!").is_err());
    }
}
