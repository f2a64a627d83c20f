//! Assembly of runtime services from configuration and credentials.
//!
//! Everything that needs a secret or an endpoint is built here, once, before
//! any network activity.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sr_assets::{AssetProvisioner, HttpFetcher, RetryPolicy};
use sr_core::config::{BackendKind, Config, Credentials};
use sr_remote::{
    ComputeBackend, HttpBackend, JobEnvironment, LocalBackend, RemoteExecutionGateway,
    SessionStore,
};
use sr_store::ArtifactTransferService;

use crate::driver::PipelineDriver;

/// Expand a leading `~` in a configured path.
fn expand_path(path: &std::path::Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Transfer service over the configured store.
pub fn transfers(config: &Config, credentials: &Credentials) -> sr_core::Result<ArtifactTransferService> {
    let mut store = config.store.clone();
    store.root = expand_path(&store.root);
    let store = sr_store::from_config(&store, credentials.store_token.clone())?;
    tracing::debug!(store = %store, "Object store ready");
    Ok(ArtifactTransferService::new(store))
}

/// Provisioner fetching over HTTP with the configured retry policy.
pub fn provisioner(config: &Config, credentials: &Credentials) -> sr_core::Result<Arc<AssetProvisioner>> {
    let fetcher = HttpFetcher::new(
        &config.assets.registry_endpoint,
        Duration::from_secs(config.assets.request_timeout_secs),
    )?
    .with_hub_cache(expand_path(&config.assets.cache_dir).join(".hub-cache"));
    let provisioner = AssetProvisioner::new(Arc::new(fetcher), RetryPolicy::from_config(&config.assets))
        .with_default_token(credentials.registry_token.clone());
    Ok(Arc::new(provisioner))
}

/// What a job needs on the executing side: store, provisioner, tools.
pub fn job_environment(config: &Config, credentials: &Credentials) -> sr_core::Result<JobEnvironment> {
    Ok(JobEnvironment::new(transfers(config, credentials)?)
        .with_provisioner(provisioner(config, credentials)?)
        .with_tools(config.tools.clone()))
}

/// The compute backend selected by `remote.backend`.
pub fn backend(config: &Config, credentials: &Credentials) -> sr_core::Result<Arc<dyn ComputeBackend>> {
    match config.remote.backend {
        BackendKind::Local => {
            tracing::debug!("Using in-process backend");
            Ok(Arc::new(LocalBackend::new(job_environment(config, credentials)?)))
        }
        BackendKind::Http => {
            let endpoint = config.remote.endpoint.as_deref().ok_or_else(|| {
                sr_core::Error::Configuration("remote.endpoint is required for the http backend".into())
            })?;
            let api_key = credentials.api_key.clone().ok_or_else(|| {
                sr_core::Error::Configuration(format!(
                    "{} is not set (required by the http backend)",
                    config.remote.api_key_env
                ))
            })?;
            let sessions = SessionStore::new(expand_path(&config.session.path));
            tracing::debug!(endpoint, "Using http backend");
            Ok(Arc::new(HttpBackend::new(
                endpoint,
                api_key,
                config.remote.poll_interval(),
                sessions,
            )?))
        }
    }
}

/// A driver wired to the configured store and backend.
pub fn driver(config: &Config, credentials: &Credentials) -> sr_core::Result<PipelineDriver> {
    let gateway = RemoteExecutionGateway::new(backend(config, credentials)?);
    Ok(PipelineDriver::new(transfers(config, credentials)?, gateway))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sr_core::config::StoreKind;

    #[test]
    fn http_backend_without_endpoint_is_a_configuration_error() {
        let mut config = Config::default();
        config.remote.backend = BackendKind::Http;
        let credentials = Credentials {
            api_key: Some("key".into()),
            ..Default::default()
        };
        let err = backend(&config, &credentials).err().unwrap();
        assert!(matches!(err, sr_core::Error::Configuration(_)));
    }

    #[test]
    fn http_backend_without_api_key_is_a_configuration_error() {
        let mut config = Config::default();
        config.remote.backend = BackendKind::Http;
        config.remote.endpoint = Some("http://127.0.0.1:9".into());
        let err = backend(&config, &Credentials::default()).err().unwrap();
        assert!(err.to_string().contains("STAGERUN_API_KEY"));
    }

    #[test]
    fn http_store_without_endpoint_is_a_configuration_error() {
        let mut config = Config::default();
        config.store.kind = StoreKind::Http;
        let err = transfers(&config, &Credentials::default()).err().unwrap();
        assert!(matches!(err, sr_core::Error::Configuration(_)));
    }

    #[test]
    fn local_setup_builds_a_driver() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.root = dir.path().join("store");
        assert!(driver(&config, &Credentials::default()).is_ok());
    }
}
