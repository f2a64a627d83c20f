//! Bounded, at-most-once job submission.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sr_core::{FailureKind, JobDescription, JobId, JobResult, ResourceClass};

use crate::backend::ComputeBackend;

/// Submits jobs to a [`ComputeBackend`] and waits for their result.
///
/// Each job id is executed at most once for the lifetime of the gateway:
/// a second submission with the same id is rejected without reaching the
/// backend. The gateway never retries on its own.
pub struct RemoteExecutionGateway {
    backend: Arc<dyn ComputeBackend>,
    submitted: Mutex<HashSet<JobId>>,
}

impl RemoteExecutionGateway {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self {
            backend,
            submitted: Mutex::new(HashSet::new()),
        }
    }

    /// Run `job` on `resource_class` and wait at most `timeout`.
    ///
    /// Always returns a [`JobResult`]: a timeout becomes
    /// `Failure(Timeout)`, a backend error becomes `Failure(Backend)`.
    pub async fn submit(
        &self,
        job: &JobDescription,
        resource_class: ResourceClass,
        timeout: Duration,
    ) -> JobResult {
        if !self.submitted.lock().insert(job.id) {
            tracing::warn!(job = %job.id, "Job already submitted; rejecting");
            return JobResult::failure(
                FailureKind::Rejected,
                format!("job {} was already submitted", job.id),
            );
        }

        let job = job
            .clone()
            .with_resource_class(resource_class)
            .with_timeout(timeout);

        tracing::info!(
            job = %job.id,
            backend = self.backend.name(),
            resource_class = %job.resource_class,
            timeout_secs = timeout.as_secs(),
            steps = job.steps.len(),
            "Submitting job"
        );

        match tokio::time::timeout(timeout, self.backend.execute(&job)).await {
            Ok(Ok(result)) => {
                match &result {
                    JobResult::Success { artifact } => {
                        tracing::info!(job = %job.id, size = artifact.size(), "Job succeeded")
                    }
                    JobResult::Failure { kind, detail } => {
                        tracing::error!(job = %job.id, kind = ?kind, detail = %detail, "Job failed")
                    }
                }
                result
            }
            Ok(Err(e)) => {
                tracing::error!(job = %job.id, error = %e, "Backend error");
                JobResult::failure(FailureKind::Backend, e.to_string())
            }
            Err(_elapsed) => {
                tracing::error!(job = %job.id, timeout_secs = timeout.as_secs(), "Job timed out");
                if let Err(e) = self.backend.cancel(job.id).await {
                    tracing::warn!(job = %job.id, error = %e, "Cancellation request failed");
                }
                JobResult::timed_out(timeout)
            }
        }
    }
}
