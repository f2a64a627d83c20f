//! Staged job runner: executes a job's steps in declaration order against
//! one working directory and hands back the artifact.

use std::time::Instant;

use sr_core::{ArtifactRef, JobDescription};

use crate::context::StepContext;
use crate::factory::create_steps;
use crate::step::Step;

/// Runs a fixed, ordered list of steps.
///
/// Every step is validated before the first one executes. Execution stops
/// at the first failing step; later steps never run and nothing is rolled
/// back. Steps share the working directory and see all prior side effects.
pub struct StagedJobRunner {
    steps: Vec<Box<dyn Step>>,
}

impl StagedJobRunner {
    /// Create a new runner from a list of steps.
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    /// Build a runner for `job` using the built-in steps.
    pub fn for_job(job: &JobDescription) -> sr_core::Result<Self> {
        Ok(Self::new(create_steps(&job.steps)?))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Execute every step and return the artifact reference.
    ///
    /// # Errors
    ///
    /// Returns [`sr_core::Error::Step`] naming the first step that failed
    /// validation or execution, or `collect-artifact` when all steps
    /// succeeded but the artifact is missing or empty.
    pub async fn run(&self, ctx: &StepContext) -> sr_core::Result<ArtifactRef> {
        if self.steps.is_empty() {
            return Err(sr_core::Error::step("runner", "no steps to execute"));
        }

        for step in &self.steps {
            step.validate().map_err(|e| {
                sr_core::Error::step(step.name(), format!("validation failed: {e}"))
            })?;
        }

        let total = self.steps.len() as f32;
        for (i, step) in self.steps.iter().enumerate() {
            tracing::info!(index = i, kind = step.kind(), "Starting: {}", step.name());
            let started = Instant::now();

            let output = step.execute(ctx).await.map_err(|e| {
                tracing::error!(
                    step = step.name(),
                    index = i,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Step failed"
                );
                sr_core::Error::step(step.name(), e.to_string())
            })?;

            let pct = (i + 1) as f32 / total * 100.0;
            ctx.progress.send(pct, step.name());
            tracing::info!(
                index = i,
                elapsed_ms = started.elapsed().as_millis() as u64,
                changed = output.changed,
                "[{:.0}%] Completed: {} ({})",
                pct,
                step.name(),
                output.summary
            );
        }

        collect_artifact(ctx).await
    }
}

/// Confirm the artifact exists and is non-empty.
async fn collect_artifact(ctx: &StepContext) -> sr_core::Result<ArtifactRef> {
    let path = ctx.artifact_path();
    let size = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            return Err(sr_core::Error::step(
                "collect-artifact",
                format!("{} is not a file", path.display()),
            ))
        }
        Err(e) => {
            return Err(sr_core::Error::step(
                "collect-artifact",
                format!("artifact {} not produced: {e}", path.display()),
            ))
        }
    };
    if size == 0 {
        return Err(sr_core::Error::step(
            "collect-artifact",
            format!("artifact {} is empty", path.display()),
        ));
    }

    tracing::info!(path = %path.display(), size, "Artifact ready");
    Ok(ArtifactRef { path, size })
}

/// Run all steps of `job` against `ctx`.
pub async fn run_job(job: &JobDescription, ctx: &StepContext) -> sr_core::Result<ArtifactRef> {
    tracing::info!(job = %job.id, steps = job.steps.len(), "Running job");
    StagedJobRunner::for_job(job)?.run(ctx).await
}
