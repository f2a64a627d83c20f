//! The [`AssetFetcher`] trait and failure classification.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sr_core::AssetSpec;

/// A failed fetch attempt, classified for the retry loop.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    /// Transient failures are retried; permanent ones end provisioning.
    pub transient: bool,
    pub message: String,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }

    /// Classify an HTTP status: 5xx, 408 and 429 are worth retrying.
    pub fn from_status(status: reqwest::StatusCode, url: &str) -> Self {
        Self::from_code(status.as_u16(), &format!("GET {url} returned {status}"))
    }

    /// Classify a raw status code; `message` describes the failed request.
    pub fn from_code(code: u16, message: &str) -> Self {
        if (500..600).contains(&code) || code == 408 || code == 429 {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => {
                let url = e.url().map(|u| u.to_string()).unwrap_or_default();
                Self::from_status(status, &url)
            }
            // Connection resets, DNS failures, timeouts, truncated bodies.
            None => Self::transient(format!("network error: {e}")),
        }
    }
}

/// Transport for one asset.
///
/// Implementations must only place a complete asset at
/// `spec.destination`; intermediate data belongs at [`partial_path`].
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, spec: &AssetSpec, token: Option<&str>) -> Result<(), FetchError>;
}

/// Staging location used while an asset is being downloaded.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("asset"));
    name.push(".partial");
    destination.with_file_name(name)
}

/// Written into a directory asset once every file is in place.
pub const COMPLETE_MARKER: &str = ".stagerun-complete";

/// Whether `path` holds a usable asset: a non-empty file, or a directory
/// carrying [`COMPLETE_MARKER`].
///
/// Other files in a directory do not count; a checked-out repository may
/// ship placeholders where an asset is later merged in.
pub fn is_complete(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len() > 0,
        Ok(meta) if meta.is_dir() => path.join(COMPLETE_MARKER).is_file(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(FetchError::from_status(StatusCode::SERVICE_UNAVAILABLE, "u").transient);
        assert!(FetchError::from_status(StatusCode::TOO_MANY_REQUESTS, "u").transient);
        assert!(FetchError::from_status(StatusCode::REQUEST_TIMEOUT, "u").transient);
        assert!(!FetchError::from_status(StatusCode::NOT_FOUND, "u").transient);
        assert!(!FetchError::from_status(StatusCode::UNAUTHORIZED, "u").transient);
        assert!(FetchError::from_code(502, "info").transient);
        assert!(!FetchError::from_code(403, "info").transient);
    }

    #[test]
    fn partial_path_is_a_sibling() {
        let p = partial_path(Path::new("/models/org/repo"));
        assert_eq!(p, PathBuf::from("/models/org/repo.partial"));
    }

    #[test]
    fn completeness_checks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("model.bin");
        assert!(!is_complete(&file));

        fs::write(&file, b"").unwrap();
        assert!(!is_complete(&file));

        fs::write(&file, b"weights").unwrap();
        assert!(is_complete(&file));

        let snapshot = dir.path().join("snapshot");
        fs::create_dir_all(snapshot.join("nested")).unwrap();
        assert!(!is_complete(&snapshot));
        fs::write(snapshot.join("nested/config.json"), b"{}").unwrap();
        assert!(!is_complete(&snapshot), "files alone do not make a snapshot complete");
        fs::write(snapshot.join(COMPLETE_MARKER), b"").unwrap();
        assert!(is_complete(&snapshot));
    }
}
