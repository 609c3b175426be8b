//! Run persistence - runs and steps stored as rows
//!
//! The store is the single source of truth; nothing is cached in memory
//! between calls. Two primitives carry the concurrency guarantees:
//! [`RunStore::create_run`] writes a run and all of its steps in one
//! transaction, and [`RunStore::claim_next`] moves one step from `pending` to
//! `running` with a conditional update, so concurrent claimers never share a
//! step.

mod error;
mod records;
mod schema;
mod sqlite;

pub use error::StoreError;
pub use records::{
    ParseStatusError, RunRecord, RunStatus, StepCompletion, StepRecord, StepStatus, now_timestamp,
    short_id,
};
pub use sqlite::SqliteStore;

use crate::template::RunContext;

/// Row-oriented storage for runs and steps
pub trait RunStore: Send + Sync {
    /// Insert a run and its steps atomically
    fn create_run(&self, run: &RunRecord, steps: &[StepRecord]) -> Result<(), StoreError>;

    /// Fetch a run by full id
    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError>;

    /// Runs whose id starts with `prefix`, at most `limit`
    fn find_runs_by_prefix(&self, prefix: &str, limit: usize)
    -> Result<Vec<RunRecord>, StoreError>;

    /// Most recent runs first
    fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError>;

    /// Steps of a run ordered by index
    fn get_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, StoreError>;

    /// Fetch a step by id
    fn get_step(&self, step_id: &str) -> Result<Option<StepRecord>, StoreError>;

    /// Claim the next pending step for a qualified agent id
    ///
    /// The `pending -> running` transition, the context read, the call to
    /// `resolve` and the write of the resolved input all happen in one
    /// transaction. Returns the claimed step with `resolved_input` set, or
    /// `None` without touching any row.
    fn claim_next(
        &self,
        agent_id: &str,
        resolve: &mut dyn FnMut(&StepRecord, &RunRecord) -> String,
    ) -> Result<Option<StepRecord>, StoreError>;

    /// Mark a running step completed, apply `update_context` to the run's
    /// context, and promote the next waiting step (or complete the run)
    fn complete_step(
        &self,
        step_id: &str,
        output: &str,
        update_context: &mut dyn FnMut(&mut RunContext),
    ) -> Result<StepCompletion, StoreError>;

    /// Mark a running step failed, failing its run
    fn fail_step(&self, step_id: &str, error: &str) -> Result<StepRecord, StoreError>;

    /// Conditionally move a run from `from` to `to`; false if it was not in `from`
    ///
    /// Pairs the run lifecycle does not allow are rejected before any write.
    fn transition_run(
        &self,
        run_id: &str,
        from: RunStatus,
        to: RunStatus,
    ) -> Result<bool, StoreError>;
}
