//! # sr-assets
//!
//! Provisioning of external assets (model snapshots, checkpoint bundles)
//! into a local cache.
//!
//! - **[`AssetProvisioner`]** -- presence check, bounded retry with backoff,
//!   soft handling of a missing registry token.
//! - **[`AssetFetcher`]** -- the transport seam; [`HttpFetcher`] implements it
//!   for plain HTTP files, and for registry snapshots through `hf-hub`.
//! - **[`RetryPolicy`]** -- attempt budget and delay schedule.

pub mod fetcher;
pub mod http;
mod hub;
pub mod provisioner;
pub mod retry;

pub use fetcher::{is_complete, partial_path, AssetFetcher, FetchError, COMPLETE_MARKER};
pub use http::HttpFetcher;
pub use provisioner::AssetProvisioner;
pub use retry::RetryPolicy;
