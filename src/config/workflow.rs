//! Workflow specification - the declarative step list a run is created from

use crate::template::RunContext;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Agent metadata declared by a workflow
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    /// Agent name, qualified as `<workflow_id>_<id>` by claimers
    pub id: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

/// A single declared step
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    /// Step name (unique within workflow when given)
    #[serde(default)]
    pub id: Option<String>,

    /// Agent responsible for the step
    #[serde(default)]
    pub agent: String,

    /// Input template with `{{key}}` placeholders
    #[serde(default)]
    pub input: String,

    /// What the agent is expected to report back (informational)
    #[serde(default)]
    pub expects: Option<String>,
}

impl StepSpec {
    /// Name stored on the step row
    pub fn display_name(&self, index: usize) -> String {
        match self.id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => format!("step-{}", index),
        }
    }
}

/// Full workflow specification
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowSpec {
    /// Workflow identifier
    #[serde(default)]
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Static context seeded into every run; values are coerced to text
    #[serde(default)]
    pub context: RunContext,

    /// Declared agents
    #[serde(default)]
    pub agents: Vec<AgentSpec>,

    /// Steps in declaration order
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl WorkflowSpec {
    /// Parse a workflow from YAML text
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Presence checks only
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.id.trim().is_empty() {
            errors.push("workflow is missing 'id'".to_string());
        }

        if self.steps.is_empty() {
            errors.push("workflow declares no steps".to_string());
        }

        let mut seen_names = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            let name = step.display_name(index);
            if step.agent.trim().is_empty() {
                errors.push(format!("step '{}' missing 'agent' field", name));
            }
            if step.input.trim().is_empty() {
                errors.push(format!("step '{}' missing 'input' field", name));
            }
            if step.id.is_some() && !seen_names.insert(name.clone()) {
                errors.push(format!("duplicate step name: {}", name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fully qualified agent identifier for one of this workflow's agents
    pub fn qualified_agent(&self, agent: &str) -> String {
        qualify_agent(&self.id, agent)
    }

    /// Distinct agent names referenced by steps, in first-use order
    pub fn step_agents(&self) -> Vec<&str> {
        let mut agents: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !agents.contains(&step.agent.as_str()) {
                agents.push(&step.agent);
            }
        }
        agents
    }
}

/// Build `<workflow_id>_<agent>`
pub fn qualify_agent(workflow_id: &str, agent: &str) -> String {
    format!("{}_{}", workflow_id, agent)
}
