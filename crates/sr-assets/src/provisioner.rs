//! Idempotent, retrying asset provisioning.

use std::path::PathBuf;
use std::sync::Arc;

use sr_core::AssetSpec;

use crate::fetcher::{is_complete, AssetFetcher};
use crate::retry::RetryPolicy;

/// Fetches assets into their destination at most once per run.
///
/// An asset whose destination already passes [`is_complete`] is returned
/// without any network I/O. Otherwise the fetcher is called up to
/// `policy.max_attempts` times, sleeping between attempts. Provisioners hold
/// no shared mutable state, so distinct assets may be provisioned
/// concurrently as long as their destinations differ.
pub struct AssetProvisioner {
    fetcher: Arc<dyn AssetFetcher>,
    policy: RetryPolicy,
    default_token: Option<String>,
}

impl AssetProvisioner {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, policy: RetryPolicy) -> Self {
        Self {
            fetcher,
            policy,
            default_token: None,
        }
    }

    /// Builder: token used for specs that do not carry their own.
    pub fn with_default_token(mut self, token: Option<String>) -> Self {
        self.default_token = token;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Make `spec` available at its destination and return that path.
    ///
    /// # Errors
    ///
    /// Returns [`sr_core::Error::Provision`] when a permanent failure occurs
    /// or the attempt budget is exhausted.
    pub async fn provision(&self, spec: &AssetSpec) -> sr_core::Result<PathBuf> {
        let destination = spec.destination.clone();

        if is_complete(&destination) {
            tracing::info!(
                asset = %spec.name,
                path = %destination.display(),
                "Asset already present; skipping download"
            );
            return Ok(destination);
        }

        let token = spec.auth_token.as_deref().or(self.default_token.as_deref());
        if token.is_none() {
            tracing::warn!(
                asset = %spec.name,
                "No registry token available; downloads may be rate-limited"
            );
        }

        let max_attempts = self.policy.max_attempts;
        let mut last_error = String::from("no attempts were made");

        for attempt in 1..=max_attempts {
            tracing::info!(
                asset = %spec.name,
                source = %spec.source,
                attempt,
                max_attempts,
                "Fetching asset"
            );

            match self.fetcher.fetch(spec, token).await {
                Ok(()) if is_complete(&destination) => {
                    tracing::info!(asset = %spec.name, attempt, "Asset downloaded");
                    return Ok(destination);
                }
                Ok(()) => {
                    last_error = format!(
                        "fetch reported success but {} is missing or empty",
                        destination.display()
                    );
                }
                Err(e) if !e.transient => {
                    tracing::error!(asset = %spec.name, attempt, error = %e, "Permanent fetch failure");
                    return Err(sr_core::Error::Provision {
                        asset: spec.name.clone(),
                        attempts: attempt,
                        message: e.message,
                        transient: false,
                    });
                }
                Err(e) => {
                    last_error = e.message;
                }
            }

            if attempt < max_attempts {
                let wait = self.policy.delay_after(attempt);
                tracing::warn!(
                    asset = %spec.name,
                    attempt,
                    wait_secs = wait.as_secs_f64(),
                    error = %last_error,
                    "Asset fetch failed, retrying"
                );
                tokio::time::sleep(wait).await;
            } else {
                tracing::error!(
                    asset = %spec.name,
                    attempts = max_attempts,
                    error = %last_error,
                    "Max retries reached"
                );
            }
        }

        Err(sr_core::Error::Provision {
            asset: spec.name.clone(),
            attempts: max_attempts,
            message: last_error,
            transient: true,
        })
    }

    /// Provision several assets in order, stopping at the first failure.
    pub async fn provision_all(&self, specs: &[AssetSpec]) -> sr_core::Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(specs.len());
        for spec in specs {
            paths.push(self.provision(spec).await?);
        }
        Ok(paths)
    }
}
