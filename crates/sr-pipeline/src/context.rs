//! Execution context shared by all steps in a job run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sr_assets::AssetProvisioner;
use sr_core::config::ToolsConfig;
use sr_core::{JobDescription, DEFAULT_JOB_TIMEOUT};

use crate::template;

/// Sender for reporting progress from within the runner.
///
/// Wraps a callback that receives a progress percentage (0.0 -- 100.0) and
/// the name of the step that just finished.
pub struct ProgressSender {
    callback: Box<dyn Fn(f32, &str) + Send + Sync>,
}

impl ProgressSender {
    /// Create a new sender from the given callback.
    pub fn new(callback: impl Fn(f32, &str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Create a no-op sender that discards all progress reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_, _| {}),
        }
    }

    /// Report progress.
    pub fn send(&self, progress: f32, step: &str) {
        (self.callback)(progress, step);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// Context passed to every step during execution.
pub struct StepContext {
    /// The job's working directory, made absolute on construction. All
    /// relative step paths resolve here.
    pub workdir: PathBuf,
    /// Artifact location, relative to `workdir` unless absolute.
    pub artifact: PathBuf,
    /// Staged job inputs by name, as local paths.
    pub inputs: HashMap<String, PathBuf>,
    /// Provisioner used by fetch-asset steps.
    pub provisioner: Option<Arc<AssetProvisioner>>,
    /// External tool names.
    pub tools: ToolsConfig,
    /// Upper bound for any single external command.
    pub command_timeout: Duration,
    /// Channel for reporting progress to the caller.
    pub progress: Arc<ProgressSender>,
}

impl StepContext {
    /// Create a new context with the minimum required fields.
    ///
    /// A relative `workdir` is anchored at the current directory so that
    /// expanded paths stay valid for commands run from a subdirectory.
    pub fn new(workdir: impl Into<PathBuf>, artifact: impl Into<PathBuf>) -> Self {
        let workdir = workdir.into();
        Self {
            workdir: std::path::absolute(&workdir).unwrap_or(workdir),
            artifact: artifact.into(),
            inputs: HashMap::new(),
            provisioner: None,
            tools: ToolsConfig::default(),
            command_timeout: DEFAULT_JOB_TIMEOUT,
            progress: Arc::new(ProgressSender::noop()),
        }
    }

    /// Context for running `job` inside `workdir`. Inputs still have to be
    /// staged by the caller.
    pub fn for_job(job: &JobDescription, workdir: impl Into<PathBuf>) -> Self {
        Self::new(workdir, job.artifact.clone()).with_command_timeout(job.timeout())
    }

    /// Builder: register a staged input. Relative paths are anchored at the
    /// current directory.
    pub fn with_input(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.inputs
            .insert(name.into(), std::path::absolute(&path).unwrap_or(path));
        self
    }

    /// Builder: attach an asset provisioner.
    pub fn with_provisioner(mut self, provisioner: Arc<AssetProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Builder: set external tool names.
    pub fn with_tools(mut self, tools: ToolsConfig) -> Self {
        self.tools = tools;
        self
    }

    /// Builder: set the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Builder: attach a progress sender.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    /// Resolve `path` against the working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }

    /// Absolute location of the job artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.resolve(&self.artifact)
    }

    /// Expand `{workdir}`, `{artifact}` and `{input:<name>}` placeholders.
    pub fn expand(&self, text: &str) -> sr_core::Result<String> {
        template::expand(text, self)
    }
}
