//! Clone a source repository into the working directory.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::command::ToolCommand;
use crate::context::StepContext;
use crate::step::{Step, StepOutput};

/// Shallow-clone `repository` into `dest`.
///
/// A destination that already holds a git checkout is left as is.
#[derive(Debug)]
pub struct CheckoutStep {
    name: String,
    repository: String,
    dest: PathBuf,
    branch: Option<String>,
}

impl CheckoutStep {
    pub fn new(
        name: impl Into<String>,
        repository: impl Into<String>,
        dest: impl Into<PathBuf>,
        branch: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            repository: repository.into(),
            dest: dest.into(),
            branch,
        }
    }
}

#[async_trait]
impl Step for CheckoutStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "checkout"
    }

    fn validate(&self) -> sr_core::Result<()> {
        if self.repository.trim().is_empty() {
            return Err(sr_core::Error::Validation("checkout repository is empty".into()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &StepContext) -> sr_core::Result<StepOutput> {
        let dest = ctx.resolve(&self.dest);
        if dest.join(".git").exists() {
            tracing::info!(path = %dest.display(), "Repository already checked out");
            return Ok(StepOutput::unchanged(format!(
                "{} already present",
                dest.display()
            )));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = ToolCommand::new(&ctx.tools.git);
        cmd.args(["clone", "--depth", "1"]);
        if let Some(ref branch) = self.branch {
            cmd.args(["--branch", branch.as_str()]);
        }
        cmd.arg(&self.repository)
            .arg(dest.to_string_lossy())
            .current_dir(&ctx.workdir)
            .timeout(ctx.command_timeout);
        cmd.execute().await?;

        Ok(StepOutput::changed(format!(
            "Cloned {} into {}",
            self.repository,
            dest.display()
        )))
    }
}
