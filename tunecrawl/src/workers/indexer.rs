//! Indexer role: compute interval vectors at tunebook granularity.

use tracing::{debug, warn};

use crate::intervals::intervals_from_pitches;
use crate::protocol::{
    AssignmentPayload, FailureKind, IndexOutcome, TuneIntervals, WorkOutcome, WorkerFailure,
    WorkerRole,
};

use super::runner::RoleExecutor;

/// Indexer executor. Pure computation; no state.
#[derive(Debug, Default)]
pub struct IndexExecutor;

impl IndexExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl RoleExecutor for IndexExecutor {
    fn role(&self) -> WorkerRole {
        WorkerRole::Indexer
    }

    async fn execute(&self, payload: AssignmentPayload) -> WorkOutcome {
        let AssignmentPayload::Index { tunebook_id, tunes } = payload else {
            warn!("Indexer received a foreign assignment");
            return WorkOutcome::Index(IndexOutcome {
                error: Some(WorkerFailure::new(
                    FailureKind::Internal,
                    "assignment kind does not match role",
                )),
                ..Default::default()
            });
        };

        let intervals: Vec<TuneIntervals> = tunes
            .iter()
            .map(|tune| TuneIntervals {
                tune_id: tune.tune_id,
                intervals: intervals_from_pitches(&tune.pitches),
            })
            .collect();

        debug!(tunebook_id, tunes = intervals.len(), "Intervals computed");
        WorkOutcome::Index(IndexOutcome {
            intervals,
            error: None,
        })
    }
}
