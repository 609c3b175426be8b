//! Errors from run and step operations

use crate::config::WorkflowLoadError;
use crate::store::{RunStatus, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Load(#[from] WorkflowLoadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task title must not be empty")]
    EmptyTask,

    #[error("no run matches '{0}'")]
    RunNotFound(String),

    #[error("run id '{prefix}' is ambiguous, matches: {}", .matches.join(", "))]
    AmbiguousRunId {
        prefix: String,
        matches: Vec<String>,
    },

    #[error("run '{run_id}' is {status}, only running runs can be cancelled")]
    InvalidRunTransition { run_id: String, status: RunStatus },
}

impl WorkflowError {
    /// True when the error is a missing workflow, run or step
    pub fn is_not_found(&self) -> bool {
        match self {
            WorkflowError::Load(e) => e.is_not_found(),
            WorkflowError::Store(StoreError::StepNotFound(_) | StoreError::RunNotFound(_)) => {
                true
            }
            WorkflowError::RunNotFound(_) => true,
            _ => false,
        }
    }
}
