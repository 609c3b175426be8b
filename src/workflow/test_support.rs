//! Shared fixtures for workflow tests

use crate::config::{StepSpec, WorkflowLoadError, WorkflowSource, WorkflowSpec};
use crate::template::RunContext;
use std::collections::HashMap;

/// Workflow source backed by a map
pub struct StaticWorkflows {
    workflows: HashMap<String, WorkflowSpec>,
}

impl StaticWorkflows {
    pub fn new(workflows: Vec<WorkflowSpec>) -> Self {
        Self {
            workflows: workflows.into_iter().map(|w| (w.id.clone(), w)).collect(),
        }
    }
}

impl WorkflowSource for StaticWorkflows {
    fn load(&self, workflow_id: &str) -> Result<WorkflowSpec, WorkflowLoadError> {
        self.workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowLoadError::NotFound {
                id: workflow_id.to_string(),
                searched: Vec::new(),
            })
    }
}

/// `feature-dev`: planner, developer, reviewer
pub fn three_step_workflow() -> WorkflowSpec {
    let mut context = RunContext::new();
    context.insert("repo", "/src/app");
    context.insert("max_iterations", 3);

    WorkflowSpec {
        id: "feature-dev".into(),
        context,
        steps: ["planner", "developer", "reviewer"]
            .iter()
            .map(|agent| StepSpec {
                agent: agent.to_string(),
                input: format!("{} works on {{{{task}}}} in {{{{repo}}}}", agent),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// Single-step workflow with an arbitrary input template
pub fn single_step_workflow(id: &str, agent: &str, input: &str) -> WorkflowSpec {
    WorkflowSpec {
        id: id.into(),
        steps: vec![StepSpec {
            agent: agent.into(),
            input: input.into(),
            ..Default::default()
        }],
        ..Default::default()
    }
}
