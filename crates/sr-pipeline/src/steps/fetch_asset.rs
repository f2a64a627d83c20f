//! Provision an external asset through the job's provisioner.

use async_trait::async_trait;
use sr_core::AssetSpec;

use crate::context::StepContext;
use crate::step::{Step, StepOutput};

/// Make one asset available at its destination.
///
/// Relative destinations resolve against the working directory.
#[derive(Debug)]
pub struct FetchAssetStep {
    name: String,
    asset: AssetSpec,
}

impl FetchAssetStep {
    pub fn new(name: impl Into<String>, asset: AssetSpec) -> Self {
        Self {
            name: name.into(),
            asset,
        }
    }
}

#[async_trait]
impl Step for FetchAssetStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "fetch_asset"
    }

    fn validate(&self) -> sr_core::Result<()> {
        self.asset.locator().map(|_| ())
    }

    async fn execute(&self, ctx: &StepContext) -> sr_core::Result<StepOutput> {
        let provisioner = ctx.provisioner.as_ref().ok_or_else(|| {
            sr_core::Error::Internal("no asset provisioner configured for this run".into())
        })?;

        let mut spec = self.asset.clone();
        spec.destination = ctx.resolve(&spec.destination);
        let path = provisioner.provision(&spec).await?;

        Ok(StepOutput::changed(format!(
            "{} available at {}",
            spec.name,
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sr_assets::{AssetFetcher, AssetProvisioner, FetchError, RetryPolicy};
    use std::sync::Arc;

    struct WriteFetcher;

    #[async_trait]
    impl AssetFetcher for WriteFetcher {
        async fn fetch(&self, spec: &AssetSpec, _token: Option<&str>) -> Result<(), FetchError> {
            std::fs::create_dir_all(spec.destination.parent().unwrap()).unwrap();
            std::fs::write(&spec.destination, b"weights").unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn resolves_destination_against_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Arc::new(AssetProvisioner::new(Arc::new(WriteFetcher), RetryPolicy::default()));
        let ctx = StepContext::new(dir.path(), "out").with_provisioner(provisioner);
        let step = FetchAssetStep::new(
            "bfm",
            AssetSpec::new("bfm", "https://example.com/BFM.mat", "deep_3drecon/BFM/BFM.mat"),
        );

        step.execute(&ctx).await.unwrap();
        assert!(dir.path().join("deep_3drecon/BFM/BFM.mat").exists());
    }

    #[tokio::test]
    async fn missing_provisioner_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let step = FetchAssetStep::new("bfm", AssetSpec::new("bfm", "https://example.com/x", "x"));
        assert!(step.execute(&StepContext::new(dir.path(), "out")).await.is_err());
    }

    #[test]
    fn invalid_source_fails_validation() {
        let step = FetchAssetStep::new("bad", AssetSpec::new("bad", "ftp://nowhere", "x"));
        assert!(step.validate().is_err());
    }
}
