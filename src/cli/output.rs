//! Output handlers for CLI commands
//!
//! Progress goes to stderr as [`OutputEvent`]s; each command's payload goes to
//! stdout as a [`CommandResult`], rendered per output mode.

use crate::store::{RunRecord, RunStatus, StepCompletion, StepRecord, short_id};
use crate::workflow::{ClaimedStep, RunDetail, RunSummary};
use serde::{Deserialize, Serialize};

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

impl OutputMode {
    /// Pick a mode from the global flags; `--json` wins over `--quiet`
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if json {
            Self::Json
        } else if quiet {
            Self::Quiet
        } else {
            Self::Console
        }
    }
}

/// Events emitted while a command runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputEvent {
    RunCreated {
        id: String,
        workflow: String,
        steps: usize,
    },
    StepClaimed {
        step: String,
        run: String,
        agent: String,
    },
    Waiting {
        agent: String,
        poll_ms: u64,
    },
    Error {
        error: String,
    },
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
}

/// Response to `step claim`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl From<Option<ClaimedStep>> for ClaimResponse {
    fn from(claimed: Option<ClaimedStep>) -> Self {
        match claimed {
            Some(step) => Self {
                found: true,
                resolved_input: Some(step.resolved_input),
                step_id: Some(step.step_id),
                run_id: Some(step.run_id),
            },
            None => Self {
                found: false,
                resolved_input: None,
                step_id: None,
                run_id: None,
            },
        }
    }
}

/// Response to `step complete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    pub step_id: String,
    pub run_id: String,
    pub run_status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step_index: Option<u32>,
}

impl CompletionResponse {
    pub fn new(step_id: &str, completion: StepCompletion) -> Self {
        let (run_id, run_status, next_step_index) = match completion {
            StepCompletion::Advanced {
                run_id,
                next_step_index,
                ..
            } => (run_id, RunStatus::Running, Some(next_step_index)),
            StepCompletion::RunCompleted { run_id } => (run_id, RunStatus::Completed, None),
            StepCompletion::RunInactive { run_id, status } => (run_id, status, None),
        };
        Self {
            step_id: step_id.to_string(),
            run_id,
            run_status,
            next_step_index,
        }
    }
}

/// Final payload of a command
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CommandResult {
    Run(RunSummary),
    Status(RunDetail),
    Runs(Vec<RunRecord>),
    Claim(ClaimResponse),
    Completion(CompletionResponse),
    Step(StepRecord),
    Workflows(Vec<String>),
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);

    /// Write a command's final payload
    fn result(&self, result: &CommandResult);
}

/// Human-readable output
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn render(result: &CommandResult) -> String {
        match result {
            CommandResult::Run(run) => format!(
                "Run {} started: {} ({} steps)\n  task: {}\n  id:   {}",
                short_id(&run.id),
                run.workflow_id,
                run.step_count,
                run.task,
                run.id
            ),
            CommandResult::Status(detail) => {
                let run = &detail.run;
                let mut out = format!(
                    "Run {} [{}] {}\n  task:    {}\n  created: {}\n  updated: {}\n",
                    run.id, run.status, run.workflow_id, run.task, run.created_at, run.updated_at
                );
                for step in &detail.steps {
                    out.push_str(&format!(
                        "  {:>2}. {:<16} {:<10} {}\n",
                        step.step_index, step.step_name, step.status, step.agent
                    ));
                    if let Some(ref error) = step.error {
                        out.push_str(&format!("      error: {}\n", error));
                    }
                }
                if !run.context.is_empty() {
                    out.push_str("  context:\n");
                    for (key, value) in run.context.iter() {
                        out.push_str(&format!("    {} = {}\n", key, value));
                    }
                }
                out.trim_end().to_string()
            }
            CommandResult::Runs(runs) => {
                if runs.is_empty() {
                    return "(no runs)".into();
                }
                runs.iter()
                    .map(|run| {
                        format!(
                            "{}  {:<10} {:<20} {}  {}",
                            run.short_id(),
                            run.status,
                            run.workflow_id,
                            run.created_at,
                            run.task
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            CommandResult::Claim(claim) => match claim.resolved_input {
                Some(ref input) => input.clone(),
                None => "(no pending step)".into(),
            },
            CommandResult::Completion(done) => match done.next_step_index {
                Some(next) => format!(
                    "Step {} completed; run {} moved to step {}",
                    short_id(&done.step_id),
                    short_id(&done.run_id),
                    next
                ),
                None => format!(
                    "Step {} completed; run {} is {}",
                    short_id(&done.step_id),
                    short_id(&done.run_id),
                    done.run_status
                ),
            },
            CommandResult::Step(step) => format!(
                "Step {} ({}) is {}",
                short_id(&step.id),
                step.step_name,
                step.status
            ),
            CommandResult::Workflows(ids) => {
                if ids.is_empty() {
                    "(no workflows found)".into()
                } else {
                    ids.join("\n")
                }
            }
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::RunCreated {
                id,
                workflow,
                steps,
            } => {
                eprintln!("Created run {} of '{}' ({} steps)", short_id(&id), workflow, steps);
            }
            OutputEvent::StepClaimed { step, run, agent } => {
                eprintln!("{} claimed step '{}' of run {}", agent, step, short_id(&run));
            }
            OutputEvent::Waiting { agent, poll_ms } => {
                eprintln!("Waiting for work for '{}' (every {}ms)...", agent, poll_ms);
            }
            OutputEvent::Error { error } => {
                eprintln!("Error: {}", error);
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Debug { message } => {
                if self.debug {
                    eprintln!("[debug] {}", message);
                }
            }
        }
    }

    fn result(&self, result: &CommandResult) {
        println!("{}", Self::render(result));
    }
}

/// JSON output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> Option<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        json.ok()
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        // Events go to stderr so stdout stays a single JSON document
        if let Some(s) = self.to_json(&event) {
            eprintln!("{}", s);
        }
    }

    fn result(&self, result: &CommandResult) {
        if let Some(s) = self.to_json(result) {
            println!("{}", s);
        }
    }
}

/// Prints only the essential value of each result
pub struct QuietHandler;

impl QuietHandler {
    fn render(result: &CommandResult) -> Option<String> {
        let rendered = match result {
            CommandResult::Run(run) => Some(run.id.clone()),
            CommandResult::Status(detail) => Some(detail.run.status.to_string()),
            CommandResult::Runs(runs) => Some(
                runs.iter()
                    .map(|r| r.id.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            CommandResult::Claim(claim) => claim.resolved_input.clone(),
            CommandResult::Completion(done) => Some(done.run_status.to_string()),
            CommandResult::Step(step) => Some(step.status.to_string()),
            CommandResult::Workflows(ids) => Some(ids.join("\n")),
        };
        rendered.filter(|s| !s.is_empty())
    }
}

impl OutputHandler for QuietHandler {
    fn emit(&self, event: OutputEvent) {
        if let OutputEvent::Error { error } = event {
            eprintln!("Error: {}", error);
        }
    }

    fn result(&self, result: &CommandResult) {
        if let Some(out) = Self::render(result) {
            println!("{}", out);
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Box::new(JsonHandler::new(false)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claimed() -> ClaimedStep {
        ClaimedStep {
            step_id: "step-1234567890".into(),
            run_id: "run-1234567890".into(),
            step_index: 0,
            step_name: "plan".into(),
            agent_id: "feature-dev_planner".into(),
            resolved_input: "Plan it".into(),
        }
    }

    #[test]
    fn test_output_mode_from_flags() {
        assert_eq!(OutputMode::from_flags(true, false), OutputMode::Json);
        assert_eq!(OutputMode::from_flags(true, true), OutputMode::Json);
        assert_eq!(OutputMode::from_flags(false, true), OutputMode::Quiet);
        assert_eq!(OutputMode::from_flags(false, false), OutputMode::Console);
    }

    #[test]
    fn test_claim_response_json() {
        let found = ClaimResponse::from(Some(claimed()));
        assert_eq!(
            serde_json::to_value(&found).unwrap(),
            serde_json::json!({
                "found": true,
                "resolvedInput": "Plan it",
                "stepId": "step-1234567890",
                "runId": "run-1234567890",
            })
        );

        let missing = ClaimResponse::from(None);
        assert_eq!(
            serde_json::to_string(&missing).unwrap(),
            r#"{"found":false}"#
        );
    }

    #[test]
    fn test_completion_response() {
        let advanced = CompletionResponse::new(
            "s1",
            StepCompletion::Advanced {
                run_id: "r1".into(),
                next_step_id: "s2".into(),
                next_step_index: 1,
            },
        );
        assert_eq!(advanced.run_status, RunStatus::Running);
        assert_eq!(advanced.next_step_index, Some(1));

        let done = CompletionResponse::new("s2", StepCompletion::RunCompleted { run_id: "r1".into() });
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            serde_json::json!({"stepId": "s2", "runId": "r1", "runStatus": "completed"})
        );
    }

    #[test]
    fn test_console_render_claim() {
        let found = CommandResult::Claim(ClaimResponse::from(Some(claimed())));
        assert_eq!(ConsoleHandler::render(&found), "Plan it");

        let missing = CommandResult::Claim(ClaimResponse::from(None));
        assert_eq!(ConsoleHandler::render(&missing), "(no pending step)");
    }

    #[test]
    fn test_quiet_render() {
        let missing = CommandResult::Claim(ClaimResponse::from(None));
        assert_eq!(QuietHandler::render(&missing), None);

        let workflows = CommandResult::Workflows(vec!["a".into(), "b".into()]);
        assert_eq!(QuietHandler::render(&workflows), Some("a\nb".into()));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = OutputEvent::Waiting {
            agent: "wf_a".into(),
            poll_ms: 500,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "Waiting");
        assert_eq!(value["poll_ms"], 500);
    }

    #[test]
    fn test_create_handler() {
        let _ = create_handler(OutputMode::Console, false);
        let _ = create_handler(OutputMode::Json, false);
        let _ = create_handler(OutputMode::Quiet, false);
    }
}
