//! Configuration types and workflow loading for flowline

mod error;
mod loader;
mod workflow;

pub use error::WorkflowLoadError;
pub use loader::{
    DatabaseConfig, FlowlineConfig, WorkerConfig, WorkflowDirs, WorkflowSource, WorkflowsConfig,
    expand_path,
};
pub use workflow::{AgentSpec, StepSpec, WorkflowSpec, qualify_agent};
