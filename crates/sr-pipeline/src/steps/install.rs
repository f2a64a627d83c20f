//! Conditional dependency installation.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::command::ToolCommand;
use crate::context::StepContext;
use crate::step::{Step, StepOutput};

/// Run an installer command, but only when `manifest` exists.
#[derive(Debug)]
pub struct InstallStep {
    name: String,
    manifest: PathBuf,
    command: String,
    args: Vec<String>,
}

impl InstallStep {
    pub fn new(
        name: impl Into<String>,
        manifest: impl Into<PathBuf>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            manifest: manifest.into(),
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl Step for InstallStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "install"
    }

    async fn execute(&self, ctx: &StepContext) -> sr_core::Result<StepOutput> {
        let manifest = ctx.resolve(&self.manifest);
        if !manifest.exists() {
            tracing::info!(manifest = %manifest.display(), "Manifest absent; skipping install");
            return Ok(StepOutput::unchanged(format!(
                "{} not found",
                manifest.display()
            )));
        }

        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            args.push(ctx.expand(arg)?);
        }

        ToolCommand::new(ctx.expand(&self.command)?)
            .args(args)
            .current_dir(&ctx.workdir)
            .timeout(ctx.command_timeout)
            .execute()
            .await?;

        Ok(StepOutput::changed(format!(
            "Installed dependencies from {}",
            manifest.display()
        )))
    }
}
