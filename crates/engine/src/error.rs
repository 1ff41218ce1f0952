use curator_core::{CoreError, RecordId};
use curator_storage::StorageError;
use thiserror::Error;

use crate::executor::StepFailure;

fn describe(failures: &[StepFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("field {field} selected from more than one candidate: {candidates:?}")]
    ConflictingFieldSelection {
        field: String,
        candidates: Vec<RecordId>,
    },

    #[error("selection references candidate {candidate}, which is not in the group; reload and re-select")]
    StaleSelection { candidate: RecordId },

    #[error("write phase failed: {}", describe(.failures))]
    WriteFailed { failures: Vec<StepFailure> },

    #[error("reassignment phase failed: {}", describe(.failures))]
    ReassignmentFailed { failures: Vec<StepFailure> },

    #[error("tombstone phase failed: {}", describe(.failures))]
    TombstoneFailed { failures: Vec<StepFailure> },

    #[error("cannot {action} in stage {stage}")]
    InvalidStage {
        action: &'static str,
        stage: &'static str,
    },

    #[error("config error: {0}")]
    Config(String),
}
