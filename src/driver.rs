//! Local orchestration of a single remote job.
//!
//! The driver owns the whole round trip: check the inputs, upload them,
//! submit exactly once, and persist the artifact. Nothing is written to the
//! output path unless the job succeeded and the artifact arrived complete.

use std::path::{Path, PathBuf};

use sr_core::{Artifact, JobDescription, JobId, ResourceClass};
use sr_remote::RemoteExecutionGateway;
use sr_store::ArtifactTransferService;

/// A local file handed to the job under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedInput {
    pub name: String,
    pub path: PathBuf,
}

impl NamedInput {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// One invocation of the driver.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Job to run. Inputs are appended by the driver after upload.
    pub job: JobDescription,
    pub inputs: Vec<NamedInput>,
    pub resource_class: ResourceClass,
    /// Where the artifact ends up locally.
    pub output: PathBuf,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub job: JobId,
    pub output: PathBuf,
    pub size: u64,
}

/// Uploads inputs, submits one job and writes its artifact.
pub struct PipelineDriver {
    transfers: ArtifactTransferService,
    gateway: RemoteExecutionGateway,
}

impl PipelineDriver {
    pub fn new(transfers: ArtifactTransferService, gateway: RemoteExecutionGateway) -> Self {
        Self { transfers, gateway }
    }

    /// Run `request` end to end.
    ///
    /// # Errors
    ///
    /// - [`sr_core::Error::Validation`] if an input is missing, before any
    ///   network activity.
    /// - [`sr_core::Error::Transfer`] if an upload or the download fails.
    /// - The error matching the job's failure kind otherwise; see
    ///   [`sr_core::JobResult::into_artifact`].
    pub async fn run(&self, request: RunRequest) -> sr_core::Result<RunOutcome> {
        let RunRequest {
            mut job,
            inputs,
            resource_class,
            output,
        } = request;

        validate_inputs(&inputs)?;

        for input in &inputs {
            let remote_path = input_remote_path(job.id, input)?;
            tracing::info!(
                input = %input.name,
                "Uploading {} to {}",
                input.path.display(),
                remote_path
            );
            let record = self.transfers.upload(&input.path, &remote_path).await?;
            tracing::debug!(bytes = record.size, "Upload complete");
            job = job.input(&input.name, remote_path);
        }

        tracing::info!(
            job = %job.id,
            resource_class = %resource_class,
            timeout_secs = job.timeout_secs,
            "Submitting job"
        );
        let result = self.gateway.submit(&job, resource_class, job.timeout()).await;
        let artifact = result.into_artifact(job.id)?;

        let size = match artifact {
            Artifact::Inline { bytes, .. } => {
                write_atomic(&output, &bytes).await?;
                bytes.len() as u64
            }
            Artifact::Stored { remote_path, .. } => {
                tracing::info!("Downloading {} to {}", remote_path, output.display());
                self.transfers.download(&remote_path, &output).await?.size
            }
        };

        tracing::info!(size, "Saved output to {}", output.display());
        Ok(RunOutcome {
            job: job.id,
            output,
            size,
        })
    }
}

/// Every input must be an existing regular file, and names must be unique.
fn validate_inputs(inputs: &[NamedInput]) -> sr_core::Result<()> {
    for (i, input) in inputs.iter().enumerate() {
        if inputs[..i].iter().any(|other| other.name == input.name) {
            return Err(sr_core::Error::Validation(format!(
                "input '{}' given more than once",
                input.name
            )));
        }
        if !input.path.is_file() {
            return Err(sr_core::Error::Validation(format!(
                "input '{}' not found at {}",
                input.name,
                input.path.display()
            )));
        }
    }
    Ok(())
}

/// `jobs/<id>/<name>/<file name>` inside the store.
fn input_remote_path(job: JobId, input: &NamedInput) -> sr_core::Result<String> {
    let file_name = input
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            sr_core::Error::Validation(format!(
                "input '{}' has no file name: {}",
                input.name,
                input.path.display()
            ))
        })?;
    Ok(format!("jobs/{job}/{}/{file_name}", input.name))
}

/// Write `bytes` to a temporary sibling of `path` and rename it into place.
async fn write_atomic(path: &Path, bytes: &[u8]) -> sr_core::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| sr_core::Error::Validation(format!("invalid output path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.{}.part", uuid::Uuid::new_v4()));

    let written = match tokio::fs::write(&tmp, bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
