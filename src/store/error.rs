//! Storage errors

use super::records::{RunStatus, StepStatus};
use std::path::PathBuf;
use thiserror::Error;

/// Failures from the run store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database at {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to create database directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to serialize run context: {0}")]
    Context(#[from] serde_json::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("step '{0}' not found")]
    StepNotFound(String),

    #[error("run '{0}' not found")]
    RunNotFound(String),

    #[error("run '{run_id}' cannot move from {from} to {to}")]
    RunTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("step '{step_id}' is {actual}, expected {expected}")]
    StepTransition {
        step_id: String,
        expected: StepStatus,
        actual: StepStatus,
    },
}

impl StoreError {
    /// True for SQLite busy/locked conditions that a caller may retry
    pub fn is_busy(&self) -> bool {
        let err = match self {
            StoreError::Database(err) | StoreError::Open { source: err, .. } => err,
            _ => return false,
        };
        matches!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_display() {
        let err = StoreError::StepTransition {
            step_id: "abc".into(),
            expected: StepStatus::Running,
            actual: StepStatus::Pending,
        };
        assert_eq!(err.to_string(), "step 'abc' is pending, expected running");
    }

    #[test]
    fn test_run_transition_display() {
        let err = StoreError::RunTransition {
            run_id: "r1".into(),
            from: RunStatus::Completed,
            to: RunStatus::Cancelled,
        };
        assert_eq!(err.to_string(), "run 'r1' cannot move from completed to cancelled");
    }

    #[test]
    fn test_not_busy() {
        assert!(!StoreError::LockPoisoned.is_busy());
        assert!(!StoreError::StepNotFound("x".into()).is_busy());
    }
}
