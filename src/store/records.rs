//! Run and step records as persisted

use crate::template::RunContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unknown status text read from storage or user input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} status '{value}'")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(ParseStatusError {
                kind: "run",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of a step: `waiting -> pending -> running -> completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Blocked behind an earlier step
    Waiting,
    /// Eligible to be claimed
    Pending,
    /// Claimed by an agent
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Waiting => "waiting",
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (StepStatus::Waiting, StepStatus::Pending)
                | (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Running, StepStatus::Completed)
                | (StepStatus::Running, StepStatus::Failed)
        )
    }

    /// Initial status for the step at `index`
    pub fn initial(index: usize) -> Self {
        if index == 0 {
            StepStatus::Pending
        } else {
            StepStatus::Waiting
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(StepStatus::Waiting),
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(ParseStatusError {
                kind: "step",
                value: other.to_string(),
            }),
        }
    }
}

/// A persisted run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub workflow_id: String,
    pub task: String,
    pub status: RunStatus,
    pub context: RunContext,
    pub created_at: String,
    pub updated_at: String,
}

impl RunRecord {
    /// First eight characters of the id, for display
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// A persisted step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: String,
    pub run_id: String,
    pub step_index: u32,
    pub step_name: String,
    pub agent: String,
    pub status: StepStatus,
    pub input_template: String,
    pub resolved_input: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// What happened to the run when a step completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCompletion {
    /// The next step of the run became pending
    Advanced {
        run_id: String,
        next_step_id: String,
        next_step_index: u32,
    },
    /// That was the last step; the run is now completed
    RunCompleted { run_id: String },
    /// The run was no longer running (e.g. cancelled); nothing was advanced
    RunInactive { run_id: String, status: RunStatus },
}

/// Shorten an id for display
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Timestamp format used for every stored time
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
