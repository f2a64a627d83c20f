//! Stagerun - staged remote execution of content-generation jobs
//!
//! This library crate exposes the driver, the built-in recipes and service
//! wiring for the binary and for integration testing.

pub mod driver;
pub mod recipes;
pub mod setup;

pub use driver::{NamedInput, PipelineDriver, RunOutcome, RunRequest};
