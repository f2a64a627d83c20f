//! # sr-pipeline
//!
//! The staged job runner: an ordered list of steps executed against one
//! working directory.
//!
//! This crate provides:
//!
//! - **[`Step`]** trait -- a single pipeline step with validate / execute
//!   semantics.
//! - **[`StepContext`]** -- shared execution context (workdir, staged inputs,
//!   asset provisioner, progress).
//! - **Built-in steps** ([`steps`]) -- checkout, patch, install, fetch asset,
//!   extract, compute.
//! - **[`StagedJobRunner`]** -- validates every step, runs them in order,
//!   stops at the first failure and checks the artifact.
//! - **[`create_steps`]** -- factory building step objects from
//!   [`JobStep`](sr_core::JobStep) values.

pub mod command;
pub mod context;
pub mod factory;
pub mod runner;
pub mod step;
pub mod steps;
pub mod template;

// Re-export key types at the crate root.
pub use command::{ToolCommand, ToolOutput};
pub use context::{ProgressSender, StepContext};
pub use factory::create_steps;
pub use runner::{run_job, StagedJobRunner};
pub use step::{Step, StepOutput};
