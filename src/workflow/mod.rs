//! Run and step lifecycle
//!
//! This module handles:
//! - Run creation from a workflow specification ([`RunManager`])
//! - Atomic step claims with template resolution ([`StepClaimer`])
//! - Step completion, which merges `KEY: value` output lines into the run
//!   context and advances the run
//!
//! # Example
//!
//! ```ignore
//! use flowline::store::SqliteStore;
//! use flowline::workflow::{RunManager, StepClaimer};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open_in_memory()?);
//! let manager = RunManager::new(workflows, store.clone());
//! let claimer = StepClaimer::new(store);
//!
//! let run = manager.run_workflow("feature-dev", "Add login", None)?;
//! if let Some(step) = claimer.claim_step("feature-dev_planner")? {
//!     claimer.complete_step(&step.step_id, "PLAN: three tasks")?;
//! }
//! ```

mod claim;
mod error;
mod outputs;
mod runner;

#[cfg(test)]
pub(crate) mod test_support;

pub use claim::{ClaimedStep, StepClaimer};
pub use error::WorkflowError;
pub use outputs::parse_output_values;
pub use runner::{RunDetail, RunManager, RunSummary, build_context, build_run};
