//! sr-core: shared job model, errors and configuration.
//!
//! This crate is the foundational dependency for all other sr-* crates. It
//! defines the data that flows through a pipeline run ([`job`]), the unified
//! error type and the TOML configuration.

pub mod config;
pub mod error;
pub mod ids;
pub mod job;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use job::*;
