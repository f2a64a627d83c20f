//! The [`ComputeBackend`] trait.

use async_trait::async_trait;
use sr_core::{JobDescription, JobId, JobResult};

/// Somewhere a [`JobDescription`] can be executed.
///
/// `execute` resolves once the job reached a terminal state. Job-level
/// failures are reported as [`JobResult::Failure`]; `Err` is reserved for
/// the backend itself misbehaving (unreachable, malformed replies).
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Run `job` to completion.
    async fn execute(&self, job: &JobDescription) -> sr_core::Result<JobResult>;

    /// Best-effort cancellation after the caller stopped waiting.
    async fn cancel(&self, _job: JobId) -> sr_core::Result<()> {
        Ok(())
    }
}

/// Emit one backend log line through `tracing`.
pub fn forward_log(job: JobId, line: &str) {
    tracing::info!(target: "stagerun::remote", job = %job, "{line}");
}
