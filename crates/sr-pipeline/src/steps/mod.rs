//! Built-in job steps.
//!
//! Each step maps one [`StepAction`](sr_core::StepAction) variant onto the
//! unified [`Step`](crate::step::Step) trait.

mod checkout;
mod compute;
mod extract;
mod fetch_asset;
mod install;
mod patch;

pub use checkout::CheckoutStep;
pub use compute::ComputeStep;
pub use extract::ExtractStep;
pub use fetch_asset::FetchAssetStep;
pub use install::InstallStep;
pub use patch::PatchStep;
