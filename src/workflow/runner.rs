//! Run manager - creates runs from workflows and owns run-level queries

use super::error::WorkflowError;
use crate::config::{WorkflowSource, WorkflowSpec};
use crate::store::{
    RunRecord, RunStatus, RunStore, StepRecord, StepStatus, now_timestamp, short_id,
};
use crate::template::{DRY_RUN_KEY, RunContext, TASK_KEY, is_reserved};
use serde::Serialize;
use std::sync::Arc;

/// How many prefix matches are reported for an ambiguous run id
const PREFIX_MATCH_LIMIT: usize = 10;

/// Returned when a run is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: String,
    pub workflow_id: String,
    pub task: String,
    pub status: RunStatus,
    pub step_count: usize,
    pub created_at: String,
}

/// A run with its steps in index order
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    pub run: RunRecord,
    pub steps: Vec<StepRecord>,
}

impl RunDetail {
    /// The step currently eligible or in progress, if any
    pub fn current_step(&self) -> Option<&StepRecord> {
        self.steps
            .iter()
            .find(|s| matches!(s.status, StepStatus::Pending | StepStatus::Running))
    }
}

/// Creates and inspects runs
pub struct RunManager {
    workflows: Arc<dyn WorkflowSource>,
    store: Arc<dyn RunStore>,
}

impl RunManager {
    pub fn new(workflows: Arc<dyn WorkflowSource>, store: Arc<dyn RunStore>) -> Self {
        Self { workflows, store }
    }

    /// Start a run of `workflow_id` for a task
    ///
    /// Nothing is written unless the workflow loads and passes its presence
    /// checks. The run and every step are inserted in one transaction.
    pub fn run_workflow(
        &self,
        workflow_id: &str,
        task: &str,
        dry_run: Option<bool>,
    ) -> Result<RunSummary, WorkflowError> {
        if task.trim().is_empty() {
            return Err(WorkflowError::EmptyTask);
        }

        let workflow = self.workflows.load(workflow_id)?;
        let (run, steps) = build_run(&workflow, task, dry_run.unwrap_or(false));

        self.store.create_run(&run, &steps)?;

        tracing::info!(
            run = run.short_id(),
            workflow = %run.workflow_id,
            steps = steps.len(),
            "Run created"
        );

        Ok(RunSummary {
            id: run.id,
            workflow_id: run.workflow_id,
            task: run.task,
            status: run.status,
            step_count: steps.len(),
            created_at: run.created_at,
        })
    }

    /// Find a run by full id or unique id prefix
    pub fn find_run(&self, id_or_prefix: &str) -> Result<RunRecord, WorkflowError> {
        let needle = id_or_prefix.trim();
        if needle.is_empty() {
            return Err(WorkflowError::RunNotFound(id_or_prefix.to_string()));
        }

        if let Some(run) = self.store.get_run(needle)? {
            return Ok(run);
        }

        let mut matches = self.store.find_runs_by_prefix(needle, PREFIX_MATCH_LIMIT)?;
        match matches.len() {
            0 => Err(WorkflowError::RunNotFound(needle.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(WorkflowError::AmbiguousRunId {
                prefix: needle.to_string(),
                matches: matches.into_iter().map(|r| r.id).collect(),
            }),
        }
    }

    /// A run and its steps
    pub fn run_status(&self, id_or_prefix: &str) -> Result<RunDetail, WorkflowError> {
        let run = self.find_run(id_or_prefix)?;
        let steps = self.store.get_steps(&run.id)?;
        Ok(RunDetail { run, steps })
    }

    /// Most recent runs first
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, WorkflowError> {
        Ok(self.store.list_runs(limit)?)
    }

    /// Cancel a running run; its remaining steps are never claimed
    pub fn cancel_run(&self, id_or_prefix: &str) -> Result<RunRecord, WorkflowError> {
        let run = self.find_run(id_or_prefix)?;
        if run.status.is_terminal() {
            return Err(WorkflowError::InvalidRunTransition {
                run_id: run.id,
                status: run.status,
            });
        }

        if !self
            .store
            .transition_run(&run.id, RunStatus::Running, RunStatus::Cancelled)?
        {
            // Re-read: the status may have changed since find_run
            let status = self
                .store
                .get_run(&run.id)?
                .map(|r| r.status)
                .unwrap_or(run.status);
            return Err(WorkflowError::InvalidRunTransition {
                run_id: run.id,
                status,
            });
        }

        tracing::info!(run = short_id(&run.id), "Run cancelled");
        self.store
            .get_run(&run.id)?
            .ok_or(WorkflowError::RunNotFound(run.id))
    }
}

/// Seed a run context: static values first, then the reserved keys
pub fn build_context(workflow: &WorkflowSpec, task: &str, dry_run: bool) -> RunContext {
    let mut context: RunContext = workflow
        .context
        .iter()
        .filter(|(key, _)| !is_reserved(key))
        .collect();
    context.insert(TASK_KEY, task);
    context.insert(DRY_RUN_KEY, dry_run);
    context
}

/// Build the rows for a new run: step 0 pending, the rest waiting
pub fn build_run(workflow: &WorkflowSpec, task: &str, dry_run: bool) -> (RunRecord, Vec<StepRecord>) {
    let now = now_timestamp();
    let run_id = uuid::Uuid::new_v4().to_string();

    let steps = workflow
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| StepRecord {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.clone(),
            step_index: index as u32,
            step_name: step.display_name(index),
            agent: step.agent.clone(),
            status: StepStatus::initial(index),
            input_template: step.input.clone(),
            resolved_input: None,
            output: None,
            error: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        })
        .collect();

    let run = RunRecord {
        id: run_id,
        workflow_id: workflow.id.clone(),
        task: task.to_string(),
        status: RunStatus::Running,
        context: build_context(workflow, task, dry_run),
        created_at: now.clone(),
        updated_at: now,
    };

    (run, steps)
}
