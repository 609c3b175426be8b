//! CLI module for flowline
//!
//! This module provides:
//! - Command implementations (run, status, step claim/complete/fail, etc.)
//! - Output handlers (console, JSON, quiet)
//! - Signal handling for interruptible waits
//!
//! # Example
//!
//! ```ignore
//! use flowline::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console, false);
//! let exit_code = commands::start_run(&ctx, "feature-dev", "Add login", false, &*handler);
//! ```

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{
    CommandContext, WaitOptions, cancel_run, claim_step, complete_step, fail_step, list_runs,
    list_workflows, run_status, start_run, validate_workflow,
};
pub use output::{CommandResult, OutputEvent, OutputHandler, OutputMode, create_handler};
pub use signals::{CancellationToken, setup_signal_handlers, with_cancellation};
