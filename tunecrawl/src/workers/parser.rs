//! Parser role: turn fetched documents into tunes.

use tracing::{debug, warn};

use crate::abc::TuneExtractor;
use crate::protocol::{
    decode_document, AssignmentPayload, FailureKind, ParseOutcome, WorkOutcome, WorkerFailure,
    WorkerRole,
};

use super::runner::RoleExecutor;

/// Parser executor: delegates tune extraction to a [`TuneExtractor`].
pub struct ParseExecutor<E: TuneExtractor> {
    extractor: E,
}

impl<E: TuneExtractor> ParseExecutor<E> {
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }
}

impl<E: TuneExtractor> RoleExecutor for ParseExecutor<E> {
    fn role(&self) -> WorkerRole {
        WorkerRole::Parser
    }

    async fn execute(&self, payload: AssignmentPayload) -> WorkOutcome {
        let AssignmentPayload::Parse { url, document, .. } = payload else {
            warn!("Parser received a foreign assignment");
            return WorkOutcome::Parse(ParseOutcome {
                error: Some(WorkerFailure::new(
                    FailureKind::Internal,
                    "assignment kind does not match role",
                )),
                ..Default::default()
            });
        };

        let body = match decode_document(&document) {
            Ok(body) => body,
            Err(e) => {
                return WorkOutcome::Parse(ParseOutcome {
                    error: Some(WorkerFailure::new(FailureKind::Malformed, e.to_string())),
                    ..Default::default()
                });
            }
        };

        let tunes = self.extractor.extract(&body);
        debug!(%url, tunes = tunes.len(), "Parsed document");
        WorkOutcome::Parse(ParseOutcome { tunes, error: None })
    }
}
