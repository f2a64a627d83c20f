//! The black-box computation of a job.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::command::ToolCommand;
use crate::context::StepContext;
use crate::step::{Step, StepOutput};

/// Run an external command with placeholder expansion.
///
/// Nothing about the command is interpreted beyond its exit status; the
/// runner checks for the artifact afterwards.
#[derive(Debug)]
pub struct ComputeStep {
    name: String,
    command: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
}

impl ComputeStep {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            dir: None,
        }
    }

    /// Run from `dir` (relative to the working directory) instead of the
    /// working directory itself.
    pub fn in_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.dir = dir;
        self
    }
}

#[async_trait]
impl Step for ComputeStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "compute"
    }

    fn validate(&self) -> sr_core::Result<()> {
        if self.command.trim().is_empty() {
            return Err(sr_core::Error::Validation("compute command is empty".into()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &StepContext) -> sr_core::Result<StepOutput> {
        let command = ctx.expand(&self.command)?;
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            args.push(ctx.expand(arg)?);
        }

        let cwd = match &self.dir {
            Some(dir) => ctx.resolve(dir),
            None => ctx.workdir.clone(),
        };

        tracing::info!(command = %command, args = ?args, cwd = %cwd.display(), "Running computation");
        let output = ToolCommand::new(&command)
            .args(args)
            .current_dir(&cwd)
            .timeout(ctx.command_timeout)
            .execute()
            .await?;

        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            tracing::debug!(target: "stagerun::compute", "{line}");
        }

        Ok(StepOutput::changed(format!("Executed: {command}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expands_inputs_and_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("face.png");
        std::fs::write(&input, b"png").unwrap();
        let ctx = StepContext::new(dir.path(), "output/result.bin").with_input("src_img", &input);

        let step = ComputeStep::new(
            "infer",
            "sh",
            vec![
                "-c".into(),
                "mkdir -p output && cat \"$0\" > \"$1\"".into(),
                "{input:src_img}".into(),
                "{artifact}".into(),
            ],
        );
        step.execute(&ctx).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("output/result.bin")).unwrap(), b"png");
    }

    #[tokio::test]
    async fn runs_from_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("repo")).unwrap();
        let ctx = StepContext::new(dir.path(), "repo/marker");

        let step = ComputeStep::new("infer", "sh", vec!["-c".into(), "echo here > marker".into()])
            .in_dir(Some("repo".into()));
        step.execute(&ctx).await.unwrap();

        assert!(dir.path().join("repo/marker").exists());
        assert!(!dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn relative_workdir_expands_to_absolute_paths() {
        // Relative to the test's current directory, like `worker --workdir work`.
        let dir = tempfile::Builder::new().prefix("relwork").tempdir_in(".").unwrap();
        let relative = dir.path().strip_prefix(".").unwrap_or(dir.path()).to_path_buf();
        assert!(relative.is_relative());
        std::fs::create_dir_all(relative.join("repo")).unwrap();
        std::fs::create_dir_all(relative.join("inputs")).unwrap();
        std::fs::write(relative.join("inputs/x.txt"), b"audio").unwrap();

        let ctx = StepContext::new(&relative, "repo/out.txt")
            .with_input("x", relative.join("inputs/x.txt"));
        assert!(ctx.workdir.is_absolute());

        let step = ComputeStep::new(
            "infer",
            "sh",
            vec!["-c".into(), "cat \"$0\" > \"$1\"".into(), "{input:x}".into(), "{artifact}".into()],
        )
        .in_dir(Some("repo".into()));
        step.execute(&ctx).await.unwrap();

        assert_eq!(std::fs::read(relative.join("repo/out.txt")).unwrap(), b"audio");
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let step = ComputeStep::new("infer", "sh", vec!["-c".into(), "exit 7".into()]);
        let err = step.execute(&StepContext::new(dir.path(), "out")).await.unwrap_err();
        assert!(err.to_string().contains("exited with status"));
    }

    #[tokio::test]
    async fn unknown_input_fails_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let step = ComputeStep::new("infer", "sh", vec!["{input:missing}".into()]);
        let err = step.execute(&StepContext::new(dir.path(), "out")).await.unwrap_err();
        assert!(matches!(err, sr_core::Error::Validation(_)));
    }
}
