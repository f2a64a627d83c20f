//! Step execution inside the remote execution context.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sr_assets::AssetProvisioner;
use sr_core::config::ToolsConfig;
use sr_core::{Artifact, ArtifactRef, FailureKind, JobDescription, JobResult};
use sr_pipeline::{run_job, StepContext};
use sr_store::ArtifactTransferService;
use tracing::Instrument;

/// Directory (under the working directory) where inputs are staged.
const INPUTS_DIR: &str = "inputs";

/// Everything a job needs from its surroundings.
#[derive(Clone)]
pub struct JobEnvironment {
    pub transfers: ArtifactTransferService,
    pub provisioner: Option<Arc<AssetProvisioner>>,
    pub tools: ToolsConfig,
}

impl JobEnvironment {
    pub fn new(transfers: ArtifactTransferService) -> Self {
        Self {
            transfers,
            provisioner: None,
            tools: ToolsConfig::default(),
        }
    }

    pub fn with_provisioner(mut self, provisioner: Arc<AssetProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn with_tools(mut self, tools: ToolsConfig) -> Self {
        self.tools = tools;
        self
    }
}

/// Run `job` inside `workdir` and package the outcome.
///
/// Inputs are downloaded from the shared store first. On success the
/// artifact is published to `job.publish_to` when set, otherwise returned
/// inline. Never panics and never returns `Err`: every failure becomes a
/// [`JobResult::Failure`].
///
/// A relative `workdir` is resolved against the current directory first.
pub async fn execute_job(job: &JobDescription, workdir: &Path, env: &JobEnvironment) -> JobResult {
    let workdir = match std::path::absolute(workdir) {
        Ok(dir) => dir,
        Err(e) => {
            return JobResult::failure(
                FailureKind::Backend,
                format!("cannot resolve working directory {}: {e}", workdir.display()),
            )
        }
    };
    run_and_package(job, &workdir, env)
        .instrument(tracing::info_span!("job", id = %job.id))
        .await
}

async fn run_and_package(job: &JobDescription, workdir: &Path, env: &JobEnvironment) -> JobResult {
    let ctx = match stage_inputs(job, workdir, env).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "Failed to stage inputs");
            return JobResult::failure(
                FailureKind::StepFailed {
                    step: "stage-inputs".into(),
                },
                e.to_string(),
            );
        }
    };

    let artifact = match run_job(job, &ctx).await {
        Ok(artifact) => artifact,
        Err(sr_core::Error::Step { step, message }) => {
            return JobResult::failure(FailureKind::StepFailed { step }, message)
        }
        Err(e) => return JobResult::failure(FailureKind::Backend, e.to_string()),
    };

    match package(job, &artifact, env).await {
        Ok(artifact) => JobResult::Success { artifact },
        Err(e) => {
            tracing::error!(error = %e, "Failed to hand back artifact");
            JobResult::failure(
                FailureKind::StepFailed {
                    step: "publish-artifact".into(),
                },
                e.to_string(),
            )
        }
    }
}

async fn stage_inputs(
    job: &JobDescription,
    workdir: &Path,
    env: &JobEnvironment,
) -> sr_core::Result<StepContext> {
    let mut ctx = StepContext::for_job(job, workdir).with_tools(env.tools.clone());
    if let Some(ref provisioner) = env.provisioner {
        ctx = ctx.with_provisioner(provisioner.clone());
    }

    for input in &job.inputs {
        let file_name = Path::new(&input.remote_path)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&input.name));
        let local = workdir.join(INPUTS_DIR).join(&input.name).join(file_name);
        env.transfers.download(&input.remote_path, &local).await?;
        tracing::debug!(input = %input.name, path = %local.display(), "Staged input");
        ctx = ctx.with_input(&input.name, local);
    }

    Ok(ctx)
}

async fn package(
    job: &JobDescription,
    artifact: &ArtifactRef,
    env: &JobEnvironment,
) -> sr_core::Result<Artifact> {
    if let Some(ref remote) = job.publish_to {
        let record = env.transfers.upload(&artifact.path, remote).await?;
        return Ok(Artifact::Stored {
            remote_path: record.remote_path,
            size: record.size,
        });
    }

    let bytes = tokio::fs::read(&artifact.path).await?;
    let file_name = artifact
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".into());
    Ok(Artifact::Inline { file_name, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sr_core::StepAction;

    fn env(store_root: &Path) -> JobEnvironment {
        JobEnvironment::new(ArtifactTransferService::new(sr_store::local_store(store_root).unwrap()))
    }

    fn copy_job() -> JobDescription {
        JobDescription::new("output/result.txt")
            .input("src", "inputs/abc/src.txt")
            .step(
                "copy",
                StepAction::Compute {
                    command: "sh".into(),
                    args: vec![
                        "-c".into(),
                        "mkdir -p output && cp \"$0\" \"$1\"".into(),
                        "{input:src}".into(),
                        "{artifact}".into(),
                    ],
                    dir: None,
                },
            )
    }

    #[tokio::test]
    async fn returns_inline_artifact() {
        let store = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(store.path().join("inputs/abc")).unwrap();
        std::fs::write(store.path().join("inputs/abc/src.txt"), b"payload").unwrap();

        let result = execute_job(&copy_job(), work.path(), &env(store.path())).await;
        assert_matches!(
            result,
            JobResult::Success { artifact: Artifact::Inline { ref file_name, ref bytes } }
                if file_name == "result.txt" && bytes == b"payload"
        );
    }

    #[tokio::test]
    async fn publishes_to_store_when_requested() {
        let store = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(store.path().join("inputs/abc")).unwrap();
        std::fs::write(store.path().join("inputs/abc/src.txt"), b"payload").unwrap();
        let job = copy_job().publish_to("outputs/result.txt");

        let result = execute_job(&job, work.path(), &env(store.path())).await;
        assert_matches!(
            result,
            JobResult::Success { artifact: Artifact::Stored { ref remote_path, size: 7 } }
                if remote_path == "outputs/result.txt"
        );
        assert_eq!(std::fs::read(store.path().join("outputs/result.txt")).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn missing_input_is_a_staging_failure() {
        let store = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();

        let result = execute_job(&copy_job(), work.path(), &env(store.path())).await;
        assert_matches!(
            result,
            JobResult::Failure { kind: FailureKind::StepFailed { ref step }, .. } if step == "stage-inputs"
        );
    }

    #[tokio::test]
    async fn relative_workdir_with_subdirectory_step() {
        let store = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(store.path().join("inputs/abc")).unwrap();
        std::fs::write(store.path().join("inputs/abc/src.txt"), b"payload").unwrap();
        let work = tempfile::Builder::new().prefix("relwork").tempdir_in(".").unwrap();
        let relative = work.path().strip_prefix(".").unwrap_or(work.path());
        assert!(relative.is_relative());
        std::fs::create_dir_all(relative.join("repo")).unwrap();

        let job = JobDescription::new("repo/out/result.txt")
            .input("src", "inputs/abc/src.txt")
            .step(
                "inference",
                StepAction::Compute {
                    command: "sh".into(),
                    args: vec![
                        "-c".into(),
                        "mkdir -p out && cp \"$0\" \"$1\"".into(),
                        "{input:src}".into(),
                        "{artifact}".into(),
                    ],
                    dir: Some("repo".into()),
                },
            );

        let result = execute_job(&job, relative, &env(store.path())).await;
        assert_matches!(
            result,
            JobResult::Success { artifact: Artifact::Inline { ref bytes, .. } } if bytes == b"payload"
        );
    }

    #[tokio::test]
    async fn step_failure_names_the_step() {
        let store = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let job = JobDescription::new("out.bin").step(
            "infer",
            StepAction::Compute {
                command: "false".into(),
                args: vec![],
                dir: None,
            },
        );

        let result = execute_job(&job, work.path(), &env(store.path())).await;
        assert_matches!(
            result,
            JobResult::Failure { kind: FailureKind::StepFailed { ref step }, .. } if step == "infer"
        );
    }
}
