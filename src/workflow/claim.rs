//! Step claim engine - hands out steps to agents and records their results

use super::error::WorkflowError;
use super::outputs::parse_output_values;
use crate::store::{RunRecord, RunStore, StepCompletion, StepRecord, short_id};
use crate::template::{RUN_ID_KEY, RunContext, resolve_with_report, suggest_key};
use serde::Serialize;
use std::sync::Arc;

/// A step handed to an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedStep {
    pub step_id: String,
    pub run_id: String,
    pub step_index: u32,
    pub step_name: String,
    pub agent_id: String,
    pub resolved_input: String,
}

pub struct StepClaimer {
    store: Arc<dyn RunStore>,
}

impl StepClaimer {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Claim the next pending step for `agent_id` (`<workflow_id>_<agent>`)
    ///
    /// Returns `None` when nothing is eligible; no row is touched in that case.
    pub fn claim_step(&self, agent_id: &str) -> Result<Option<ClaimedStep>, WorkflowError> {
        let mut resolve = |step: &StepRecord, run: &RunRecord| -> String {
            resolve_step_input(step, run)
        };

        let Some(step) = self.store.claim_next(agent_id, &mut resolve)? else {
            tracing::debug!(agent = agent_id, "No pending step");
            return Ok(None);
        };

        tracing::info!(
            agent = agent_id,
            run = short_id(&step.run_id),
            step = %step.step_name,
            index = step.step_index,
            "Step claimed"
        );

        Ok(Some(ClaimedStep {
            step_id: step.id,
            run_id: step.run_id,
            step_index: step.step_index,
            step_name: step.step_name,
            agent_id: agent_id.to_string(),
            resolved_input: step.resolved_input.unwrap_or_default(),
        }))
    }

    /// Record a step's output and advance its run
    ///
    /// `KEY: value` lines in `output` are merged into the run context under
    /// the lowercased key. Reserved keys are skipped.
    pub fn complete_step(
        &self,
        step_id: &str,
        output: &str,
    ) -> Result<StepCompletion, WorkflowError> {
        let values = parse_output_values(output);
        let mut rejected = Vec::new();

        let completion = self.store.complete_step(step_id, output, &mut |ctx: &mut RunContext| {
            rejected = ctx.merge_unreserved(values.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        })?;

        for key in &rejected {
            tracing::warn!(step = short_id(step_id), key = %key, "Ignoring reserved context key");
        }

        match &completion {
            StepCompletion::Advanced {
                run_id,
                next_step_index,
                ..
            } => tracing::info!(
                run = short_id(run_id),
                step = short_id(step_id),
                next = next_step_index,
                values = values.len(),
                "Step completed"
            ),
            StepCompletion::RunCompleted { run_id } => {
                tracing::info!(run = short_id(run_id), "Run completed")
            }
            StepCompletion::RunInactive { run_id, status } => tracing::warn!(
                run = short_id(run_id),
                status = %status,
                "Step completed on an inactive run, not advancing"
            ),
        }

        Ok(completion)
    }

    /// Record a step failure; the run fails with it
    pub fn fail_step(&self, step_id: &str, error: &str) -> Result<StepRecord, WorkflowError> {
        let step = self.store.fail_step(step_id, error)?;
        tracing::warn!(
            run = short_id(&step.run_id),
            step = %step.step_name,
            error,
            "Step failed"
        );
        Ok(step)
    }
}

/// Resolve a step's template against its run's context plus `run_id`
fn resolve_step_input(step: &StepRecord, run: &RunRecord) -> String {
    let mut context = run.context.clone();
    context.insert(RUN_ID_KEY, run.id.as_str());

    let resolution = resolve_with_report(&step.input_template, &context);
    for key in &resolution.missing {
        match suggest_key(key, context.keys()) {
            Some(suggestion) => tracing::warn!(
                run = run.short_id(),
                step = %step.step_name,
                key = %key,
                %suggestion,
                "Unresolved placeholder"
            ),
            None => tracing::warn!(
                run = run.short_id(),
                step = %step.step_name,
                key = %key,
                "Unresolved placeholder"
            ),
        }
    }
    resolution.text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RunStatus, SqliteStore, StepStatus};
    use crate::workflow::RunManager;
    use crate::workflow::test_support::{
        StaticWorkflows, single_step_workflow, three_step_workflow,
    };
    use std::sync::Barrier;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (RunManager, StepClaimer, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let workflows = Arc::new(StaticWorkflows::new(vec![
            three_step_workflow(),
            single_step_workflow("flags", "checker", "TASK={{task}} DRY_RUN={{dry_run}}"),
            single_step_workflow("ids", "tagger", "run {{run_id}} {{tsak}}"),
        ]));
        (
            RunManager::new(workflows, store.clone()),
            StepClaimer::new(store.clone()),
            store,
        )
    }

    #[test]
    fn test_claim_resolves_input() {
        let (manager, claimer, _) = setup();
        let run = manager.run_workflow("flags", "T", Some(true)).unwrap();

        let claimed = claimer.claim_step("flags_checker").unwrap().unwrap();
        assert_eq!(claimed.run_id, run.id);
        assert_eq!(claimed.step_index, 0);
        assert_eq!(claimed.step_name, "step-0");
        assert_eq!(claimed.resolved_input, "TASK=T DRY_RUN=true");
    }

    #[test]
    fn test_run_id_injected_but_not_persisted() {
        let (manager, claimer, store) = setup();
        let run = manager.run_workflow("ids", "T", None).unwrap();

        let claimed = claimer.claim_step("ids_tagger").unwrap().unwrap();
        assert_eq!(
            claimed.resolved_input,
            format!("run {} [missing: tsak]", run.id)
        );

        let stored = store.get_run(&run.id).unwrap().unwrap();
        assert!(!stored.context.contains_key(RUN_ID_KEY));
    }

    #[test]
    fn test_claim_nothing_eligible() {
        let (manager, claimer, store) = setup();
        manager.run_workflow("feature-dev", "T", None).unwrap();

        assert!(claimer.claim_step("feature-dev_developer").unwrap().is_none());
        assert!(claimer.claim_step("developer").unwrap().is_none());
        assert!(claimer.claim_step("unknown_agent").unwrap().is_none());

        let steps = store.list_runs(1).unwrap();
        let steps = store.get_steps(&steps[0].id).unwrap();
        assert!(steps.iter().all(|s| s.resolved_input.is_none()));
    }

    #[test]
    fn test_full_lifecycle() {
        let (manager, claimer, store) = setup();
        let run = manager.run_workflow("feature-dev", "Add login", None).unwrap();

        let plan = claimer.claim_step("feature-dev_planner").unwrap().unwrap();
        assert_eq!(plan.resolved_input, "planner works on Add login in /src/app");

        let completion = claimer
            .complete_step(&plan.step_id, "Plan ready\nPLAN: three tasks\nTASK: hijack")
            .unwrap();
        assert!(matches!(
            completion,
            StepCompletion::Advanced {
                next_step_index: 1,
                ..
            }
        ));

        let context = store.get_run(&run.id).unwrap().unwrap().context;
        assert_eq!(context.get("plan"), Some("three tasks"));
        assert_eq!(context.get("task"), Some("Add login"));

        let dev = claimer.claim_step("feature-dev_developer").unwrap().unwrap();
        assert_eq!(dev.step_index, 1);
        claimer.complete_step(&dev.step_id, "done").unwrap();

        let review = claimer.claim_step("feature-dev_reviewer").unwrap().unwrap();
        let completion = claimer.complete_step(&review.step_id, "LGTM").unwrap();
        assert_eq!(
            completion,
            StepCompletion::RunCompleted {
                run_id: run.id.clone()
            }
        );

        let detail = manager.run_status(&run.id).unwrap();
        assert_eq!(detail.run.status, RunStatus::Completed);
        assert!(detail.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert!(detail.current_step().is_none());
    }

    #[test]
    fn test_outputs_flow_into_later_steps() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut workflow = single_step_workflow("chain", "first", "start {{task}}");
        workflow.steps.push(crate::config::StepSpec {
            agent: "second".into(),
            input: "branch={{branch}}".into(),
            ..Default::default()
        });
        let manager = RunManager::new(
            Arc::new(StaticWorkflows::new(vec![workflow])),
            store.clone(),
        );
        let claimer = StepClaimer::new(store);

        manager.run_workflow("chain", "T", None).unwrap();
        let first = claimer.claim_step("chain_first").unwrap().unwrap();
        claimer
            .complete_step(&first.step_id, "BRANCH: feature/x")
            .unwrap();

        let second = claimer.claim_step("chain_second").unwrap().unwrap();
        assert_eq!(second.resolved_input, "branch=feature/x");
    }

    #[test]
    fn test_fail_step_stops_run() {
        let (manager, claimer, _) = setup();
        let run = manager.run_workflow("feature-dev", "T", None).unwrap();

        let plan = claimer.claim_step("feature-dev_planner").unwrap().unwrap();
        let failed = claimer.fail_step(&plan.step_id, "no plan").unwrap();
        assert_eq!(failed.status, StepStatus::Failed);

        let detail = manager.run_status(&run.id).unwrap();
        assert_eq!(detail.run.status, RunStatus::Failed);
        assert_eq!(detail.steps[1].status, StepStatus::Waiting);
        assert!(claimer.claim_step("feature-dev_developer").unwrap().is_none());
    }

    #[test]
    fn test_cancelled_run_is_not_claimed() {
        let (manager, claimer, _) = setup();
        let run = manager.run_workflow("feature-dev", "T", None).unwrap();
        manager.cancel_run(&run.id).unwrap();

        assert!(claimer.claim_step("feature-dev_planner").unwrap().is_none());
    }

    #[test]
    fn test_complete_pending_step_is_rejected() {
        let (manager, claimer, store) = setup();
        let run = manager.run_workflow("feature-dev", "T", None).unwrap();
        let steps = store.get_steps(&run.id).unwrap();

        let err = claimer.complete_step(&steps[0].id, "STATUS: done").unwrap_err();
        assert!(matches!(err, WorkflowError::Store(_)));

        let after = store.get_run(&run.id).unwrap().unwrap();
        assert!(!after.context.contains_key("status"));
        assert_eq!(store.get_steps(&run.id).unwrap(), steps);

        let err = claimer.complete_step("missing", "x").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_same_agent_serves_runs_in_creation_order() {
        let (manager, claimer, _) = setup();
        let first = manager.run_workflow("feature-dev", "one", None).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let second = manager.run_workflow("feature-dev", "two", None).unwrap();

        let a = claimer.claim_step("feature-dev_planner").unwrap().unwrap();
        let b = claimer.claim_step("feature-dev_planner").unwrap().unwrap();
        assert_eq!(a.run_id, first.id);
        assert_eq!(b.run_id, second.id);
        assert!(claimer.claim_step("feature-dev_planner").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_claims_share_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.db");
        let timeout = Duration::from_secs(10);

        let store = Arc::new(SqliteStore::open(&path, timeout).unwrap());
        let manager = RunManager::new(
            Arc::new(StaticWorkflows::new(vec![three_step_workflow()])),
            store,
        );
        const RUNS: usize = 4;
        for i in 0..RUNS {
            manager
                .run_workflow("feature-dev", &format!("task {}", i), None)
                .unwrap();
        }

        const WORKERS: usize = 8;
        let barrier = Arc::new(Barrier::new(WORKERS));
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let claimer =
                        StepClaimer::new(Arc::new(SqliteStore::open(&path, timeout).unwrap()));
                    barrier.wait();
                    claimer
                        .claim_step("feature-dev_planner")
                        .unwrap()
                        .map(|c| c.step_id)
                })
            })
            .collect();

        let mut claimed: Vec<String> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(claimed.len(), RUNS);
        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), RUNS);
    }
}
