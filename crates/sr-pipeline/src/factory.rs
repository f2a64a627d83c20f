//! Step factory: construct [`Step`] objects from [`JobStep`] values.

use sr_core::{JobStep, StepAction};

use crate::step::Step;
use crate::steps::{
    CheckoutStep, ComputeStep, ExtractStep, FetchAssetStep, InstallStep, PatchStep,
};

/// Create a list of boxed [`Step`] objects, preserving declaration order.
///
/// # Errors
///
/// Returns [`sr_core::Error::Validation`] when two steps share a name, since
/// failures are reported by step name.
pub fn create_steps(configs: &[JobStep]) -> sr_core::Result<Vec<Box<dyn Step>>> {
    let mut steps: Vec<Box<dyn Step>> = Vec::with_capacity(configs.len());

    for config in configs {
        if steps.iter().any(|s| s.name() == config.name) {
            return Err(sr_core::Error::Validation(format!(
                "duplicate step name '{}'",
                config.name
            )));
        }

        let name = config.name.clone();
        let step: Box<dyn Step> = match &config.action {
            StepAction::Checkout {
                repository,
                dest,
                branch,
            } => Box::new(CheckoutStep::new(name, repository, dest, branch.clone())),
            StepAction::Patch { file, replacements } => {
                Box::new(PatchStep::new(name, file, replacements.clone()))
            }
            StepAction::Install {
                manifest,
                command,
                args,
            } => Box::new(InstallStep::new(name, manifest, command, args.clone())),
            StepAction::FetchAsset { asset } => Box::new(FetchAssetStep::new(name, asset.clone())),
            StepAction::Extract { dir, pattern } => Box::new(ExtractStep::new(name, dir, pattern)),
            StepAction::Compute { command, args, dir } => {
                Box::new(ComputeStep::new(name, command, args.clone()).in_dir(dir.clone()))
            }
        };
        steps.push(step);
    }

    Ok(steps)
}
