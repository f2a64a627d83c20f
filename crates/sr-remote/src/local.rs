//! In-process backend.

use async_trait::async_trait;
use sr_core::{JobDescription, JobResult};

use crate::backend::ComputeBackend;
use crate::worker::{execute_job, JobEnvironment};

/// Runs jobs in this process, each in a fresh temporary working directory
/// that is removed afterwards.
pub struct LocalBackend {
    env: JobEnvironment,
}

impl LocalBackend {
    pub fn new(env: JobEnvironment) -> Self {
        Self { env }
    }
}

#[async_trait]
impl ComputeBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(&self, job: &JobDescription) -> sr_core::Result<JobResult> {
        let workdir = tempfile::Builder::new().prefix("stagerun-job-").tempdir()?;
        tracing::info!(
            job = %job.id,
            workdir = %workdir.path().display(),
            resource_class = %job.resource_class,
            "Executing job locally"
        );
        Ok(execute_job(job, workdir.path(), &self.env).await)
    }
}
