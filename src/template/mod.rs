//! Template resolution for step inputs
//!
//! Step inputs are plain text with `{{key}}` placeholders resolved against a
//! run's flat string context.
//!
//! # Example
//!
//! ```ignore
//! use flowline::template::{RunContext, resolve_template};
//!
//! let mut ctx = RunContext::new();
//! ctx.insert("task", "Deploy app");
//! ctx.insert("dry_run", false);
//!
//! let input = resolve_template("Do {{task}} (dry run: {{dry_run}})", &ctx);
//! assert_eq!(input, "Do Deploy app (dry run: false)");
//! ```

mod context;
mod resolver;
mod suggest;

pub use context::{
    ContextValue, DRY_RUN_KEY, RESERVED_KEYS, RUN_ID_KEY, RunContext, TASK_KEY, is_reserved,
};
pub use resolver::{Resolution, resolve_template, resolve_with_report};
pub use suggest::suggest_key;
