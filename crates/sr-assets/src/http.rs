//! HTTP transport for assets.
//!
//! Plain file URLs land in a `.partial` sibling first and resume an existing
//! partial with a `Range` request; the final rename is the only step that
//! makes the file visible at its destination. Registry snapshots go through
//! [`crate::hub`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, RANGE};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use sr_core::{AssetSource, AssetSpec};
use tokio::io::AsyncWriteExt;

use crate::fetcher::{partial_path, AssetFetcher, FetchError};
use crate::hub;

/// [`AssetFetcher`] backed by `reqwest`.
pub struct HttpFetcher {
    client: Client,
    registry_endpoint: String,
    hub_cache: PathBuf,
}

impl HttpFetcher {
    /// Create a fetcher for the given registry endpoint.
    ///
    /// `request_timeout` bounds each individual request, not a whole
    /// snapshot.
    pub fn new(registry_endpoint: &str, request_timeout: Duration) -> sr_core::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| sr_core::Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            registry_endpoint: registry_endpoint.trim_end_matches('/').to_string(),
            hub_cache: PathBuf::from(".hub-cache"),
        })
    }

    /// Directory the registry client downloads snapshot files into before
    /// they are merged into place. Keep it on the same filesystem as the
    /// destinations so files can be hard-linked.
    pub fn with_hub_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hub_cache = dir.into();
        self
    }

    fn get(&self, url: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Download one URL to `dest`, resuming `dest.partial` when present.
    async fn fetch_file(
        &self,
        url: &str,
        dest: &Path,
        token: Option<&str>,
        sha256: Option<&str>,
    ) -> Result<(), FetchError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                FetchError::permanent(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let partial = partial_path(dest);
        let resume_from = tokio::fs::metadata(&partial)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let mut request = self.get(url, token);
        if resume_from > 0 {
            tracing::debug!(url, resume_from, "Resuming partial download");
            request = request.header(RANGE, format!("bytes={resume_from}-"));
        }

        let response = request.send().await?;
        let status = response.status();
        let append = match status {
            StatusCode::PARTIAL_CONTENT => true,
            StatusCode::RANGE_NOT_SATISFIABLE => {
                // The partial no longer matches the remote file; start over.
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(FetchError::transient(format!(
                    "stale partial download for {url} discarded"
                )));
            }
            s if s.is_success() => false,
            s => return Err(FetchError::from_status(s, url)),
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&partial)
            .await
            .map_err(|e| FetchError::permanent(format!("failed to open {}: {e}", partial.display())))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::transient(format!("failed to write chunk: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| FetchError::transient(format!("failed to flush download: {e}")))?;
        drop(file);

        if let Some(expected) = sha256 {
            let actual = sha256_file(&partial).await?;
            if !actual.eq_ignore_ascii_case(expected) {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(FetchError::permanent(format!(
                    "SHA-256 mismatch for {url}. Expected: {expected}, got: {actual}"
                )));
            }
        }

        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| FetchError::permanent(format!("failed to move download into place: {e}")))
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, spec: &AssetSpec, token: Option<&str>) -> Result<(), FetchError> {
        let source = spec
            .locator()
            .map_err(|e| FetchError::permanent(e.to_string()))?;
        match source {
            AssetSource::Url(url) => {
                self.fetch_file(&url, &spec.destination, token, spec.sha256.as_deref())
                    .await
            }
            AssetSource::Hub { repo, revision } => {
                hub::fetch_snapshot(
                    &self.registry_endpoint,
                    &self.hub_cache,
                    &repo,
                    &revision,
                    &spec.destination,
                    token,
                )
                .await
            }
        }
    }
}

async fn sha256_file(path: &Path) -> Result<String, FetchError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok::<_, std::io::Error>(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| FetchError::permanent(format!("checksum task failed: {e}")))?
    .map_err(|e| FetchError::permanent(format!("failed to hash download: {e}")))
}
