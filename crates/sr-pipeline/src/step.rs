//! The [`Step`] trait defines a single unit of work in a job.
//!
//! Each step validates its parameters up front and then executes against the
//! shared working directory. Steps see whatever earlier steps left behind;
//! there is no isolation and no rollback.

use async_trait::async_trait;

use crate::context::StepContext;

/// Result of a successfully executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    /// Human-readable summary of what the step did.
    pub summary: String,
    /// `false` when the step found nothing to do (already patched, no
    /// archives, manifest absent, asset cached).
    pub changed: bool,
}

impl StepOutput {
    pub fn changed(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            changed: true,
        }
    }

    pub fn unchanged(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            changed: false,
        }
    }
}

/// A single step in a job.
#[async_trait]
pub trait Step: Send + Sync {
    /// The name this step was declared with in the job description.
    fn name(&self) -> &str;

    /// The kind of step (`patch`, `compute`, ...), used in logs.
    fn kind(&self) -> &'static str;

    /// Check parameters before any step runs.
    ///
    /// Must not touch the working directory. The default accepts everything.
    fn validate(&self) -> sr_core::Result<()> {
        Ok(())
    }

    /// Perform the step.
    async fn execute(&self, ctx: &StepContext) -> sr_core::Result<StepOutput>;
}
