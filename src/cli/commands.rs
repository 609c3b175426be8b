//! CLI command implementations
//!
//! Every command reports through an [`OutputHandler`] and returns the process
//! exit code: 0 on success, 1 on a handled failure.

use super::output::{
    ClaimResponse, CommandResult, CompletionResponse, OutputEvent, OutputHandler,
};
use super::signals::{CancellationToken, with_cancellation};
use crate::config::{WorkflowDirs, WorkflowLoadError, WorkflowSource};
use crate::workflow::{RunManager, StepClaimer, WorkflowError};
use std::sync::Arc;
use std::time::Duration;

/// Everything a command needs, built once per process
pub struct CommandContext {
    pub workflows: Arc<WorkflowDirs>,
    pub manager: RunManager,
    pub claimer: Arc<StepClaimer>,
}

/// Polling settings for `step claim --wait`
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub poll_interval: Duration,
}

fn report_error(handler: &dyn OutputHandler, err: &WorkflowError) -> i32 {
    handler.emit(OutputEvent::Error {
        error: err.to_string(),
    });
    1
}

/// Start a run
pub fn start_run(
    ctx: &CommandContext,
    workflow_id: &str,
    task: &str,
    dry_run: bool,
    handler: &dyn OutputHandler,
) -> i32 {
    // Only an explicit flag is passed through; absent means the default
    let dry_run = dry_run.then_some(true);

    match ctx.manager.run_workflow(workflow_id, task, dry_run) {
        Ok(summary) => {
            handler.emit(OutputEvent::RunCreated {
                id: summary.id.clone(),
                workflow: summary.workflow_id.clone(),
                steps: summary.step_count,
            });
            handler.result(&CommandResult::Run(summary));
            0
        }
        Err(e) => report_error(handler, &e),
    }
}

/// Show a run and its steps
pub fn run_status(ctx: &CommandContext, run: &str, handler: &dyn OutputHandler) -> i32 {
    match ctx.manager.run_status(run) {
        Ok(detail) => {
            handler.result(&CommandResult::Status(detail));
            0
        }
        Err(e) => report_error(handler, &e),
    }
}

/// List recent runs
pub fn list_runs(ctx: &CommandContext, limit: usize, handler: &dyn OutputHandler) -> i32 {
    match ctx.manager.list_runs(limit) {
        Ok(runs) => {
            handler.result(&CommandResult::Runs(runs));
            0
        }
        Err(e) => report_error(handler, &e),
    }
}

/// Cancel a running run
pub fn cancel_run(ctx: &CommandContext, run: &str, handler: &dyn OutputHandler) -> i32 {
    match ctx.manager.cancel_run(run) {
        Ok(record) => {
            handler.emit(OutputEvent::Info {
                message: format!("Cancelled run {}", record.short_id()),
            });
            match ctx.manager.run_status(&record.id) {
                Ok(detail) => handler.result(&CommandResult::Status(detail)),
                Err(e) => return report_error(handler, &e),
            }
            0
        }
        Err(e) => report_error(handler, &e),
    }
}

/// Load and presence-check a workflow file
pub fn validate_workflow(
    workflows: &WorkflowDirs,
    workflow_id: &str,
    handler: &dyn OutputHandler,
) -> i32 {
    match workflows.load(workflow_id) {
        Ok(wf) => {
            handler.emit(OutputEvent::Info {
                message: format!(
                    "✓ Workflow '{}' is valid ({} steps)",
                    wf.id,
                    wf.steps.len()
                ),
            });
            for agent in wf.step_agents() {
                handler.emit(OutputEvent::Info {
                    message: format!("  agent: {}", wf.qualified_agent(agent)),
                });
            }
            0
        }
        Err(WorkflowLoadError::Invalid { id, errors }) => {
            handler.emit(OutputEvent::Error {
                error: format!("✗ Workflow '{}' has {} error(s):", id, errors.len()),
            });
            for err in &errors {
                handler.emit(OutputEvent::Info {
                    message: format!("  - {}", err),
                });
            }
            1
        }
        Err(e) => {
            handler.emit(OutputEvent::Error {
                error: format!("Failed to load workflow: {}", e),
            });
            1
        }
    }
}

/// List workflow ids found in the search directories
pub fn list_workflows(workflows: &WorkflowDirs, handler: &dyn OutputHandler) -> i32 {
    for dir in workflows.dirs() {
        handler.emit(OutputEvent::Debug {
            message: format!("searching {}", dir.display()),
        });
    }
    handler.result(&CommandResult::Workflows(workflows.list()));
    0
}

/// Claim the next step for an agent, optionally polling until one appears
pub async fn claim_step(
    ctx: &CommandContext,
    agent_id: &str,
    wait: Option<WaitOptions>,
    token: CancellationToken,
    handler: &dyn OutputHandler,
) -> i32 {
    if let Some(opts) = wait {
        handler.emit(OutputEvent::Waiting {
            agent: agent_id.to_string(),
            poll_ms: opts.poll_interval.as_millis() as u64,
        });
    }

    loop {
        // A waiting agent that was interrupted should not take new work
        if wait.is_some() && token.is_cancelled() {
            return report_interrupted(handler);
        }

        let claimer = Arc::clone(&ctx.claimer);
        let agent = agent_id.to_string();
        let attempt = tokio::task::spawn_blocking(move || claimer.claim_step(&agent)).await;

        let claimed = match attempt {
            Ok(Ok(claimed)) => claimed,
            // Lock contention outlasted the busy timeout; try again next poll
            Ok(Err(WorkflowError::Store(ref e))) if e.is_busy() && wait.is_some() => {
                tracing::warn!(agent = agent_id, error = %e, "Database busy, retrying");
                None
            }
            Ok(Err(e)) => return report_error(handler, &e),
            Err(e) => {
                handler.emit(OutputEvent::Error {
                    error: format!("claim task failed: {}", e),
                });
                return 1;
            }
        };

        if let Some(ref step) = claimed {
            handler.emit(OutputEvent::StepClaimed {
                step: step.step_name.clone(),
                run: step.run_id.clone(),
                agent: step.agent_id.clone(),
            });
        }

        let Some(opts) = wait.filter(|_| claimed.is_none()) else {
            handler.result(&CommandResult::Claim(ClaimResponse::from(claimed)));
            return 0;
        };

        let delay = jittered(opts.poll_interval);
        if with_cancellation(token.clone(), tokio::time::sleep(delay))
            .await
            .is_none()
        {
            return report_interrupted(handler);
        }
    }
}

fn report_interrupted(handler: &dyn OutputHandler) -> i32 {
    handler.emit(OutputEvent::Info {
        message: "Interrupted while waiting for work".into(),
    });
    handler.result(&CommandResult::Claim(ClaimResponse::from(None)));
    0
}

/// Poll interval plus up to 25% random jitter
pub fn jittered(base: Duration) -> Duration {
    let jitter = rand::random::<f64>() * 0.25 * base.as_secs_f64();
    base + Duration::from_secs_f64(jitter)
}

/// Record a step's output
pub fn complete_step(
    ctx: &CommandContext,
    step_id: &str,
    output: &str,
    handler: &dyn OutputHandler,
) -> i32 {
    match ctx.claimer.complete_step(step_id, output) {
        Ok(completion) => {
            handler.result(&CommandResult::Completion(CompletionResponse::new(
                step_id, completion,
            )));
            0
        }
        Err(e) => report_error(handler, &e),
    }
}

/// Record a step failure
pub fn fail_step(
    ctx: &CommandContext,
    step_id: &str,
    error: &str,
    handler: &dyn OutputHandler,
) -> i32 {
    match ctx.claimer.fail_step(step_id, error) {
        Ok(step) => {
            handler.emit(OutputEvent::Info {
                message: format!("Run {} failed", crate::store::short_id(&step.run_id)),
            });
            handler.result(&CommandResult::Step(step));
            0
        }
        Err(e) => report_error(handler, &e),
    }
}
