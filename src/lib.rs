//! flowline - hand out workflow steps to agents one at a time
//!
//! A run is created from a declarative workflow; its steps are claimed by
//! agents in order, each with its input template resolved against the run's
//! context.

pub mod cli;
pub mod config;
pub mod logging;
pub mod store;
pub mod template;
pub mod workflow;
