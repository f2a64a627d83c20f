//! Model-registry snapshots through `hf-hub`.
//!
//! Files are downloaded into the registry cache and then merged into the
//! destination one at a time, so a directory that already exists (for
//! example a placeholder inside a checked-out repository) keeps its other
//! contents. [`COMPLETE_MARKER`] is written last.

use std::path::{Component, Path, PathBuf};

use hf_hub::api::tokio::{ApiBuilder, ApiError};
use hf_hub::{Repo, RepoType};

use crate::fetcher::{partial_path, FetchError, COMPLETE_MARKER};

/// Download `repo@revision` and merge every file into `dest`.
pub(crate) async fn fetch_snapshot(
    endpoint: &str,
    cache: &Path,
    repo_id: &str,
    revision: &str,
    dest: &Path,
    token: Option<&str>,
) -> Result<(), FetchError> {
    let api = ApiBuilder::new()
        .with_endpoint(endpoint.to_string())
        .with_cache_dir(cache.to_path_buf())
        .with_token(token.map(str::to_string))
        .with_progress(false)
        .build()
        .map_err(|e| FetchError::permanent(format!("failed to set up registry client: {e}")))?;
    let repo = api.repo(Repo::with_revision(
        repo_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    let info = repo
        .info()
        .await
        .map_err(|e| classify(&format!("listing {repo_id}@{revision}"), e))?;
    if info.siblings.is_empty() {
        return Err(FetchError::permanent(format!(
            "repository {repo_id}@{revision} lists no files"
        )));
    }

    let mut staged = Vec::with_capacity(info.siblings.len());
    for sibling in &info.siblings {
        let relative = PathBuf::from(&sibling.rfilename);
        if !is_safe_relative(&relative) {
            return Err(FetchError::permanent(format!(
                "refusing unsafe file name '{}' in {repo_id}",
                sibling.rfilename
            )));
        }
        tracing::debug!(repo = repo_id, file = %sibling.rfilename, "Downloading snapshot file");
        let cached = repo
            .get(&sibling.rfilename)
            .await
            .map_err(|e| classify(&format!("downloading {repo_id}/{}", sibling.rfilename), e))?;
        staged.push((relative, cached));
    }

    let dest = dest.to_path_buf();
    let stamp = format!("{repo_id}@{}\n", info.sha);
    tokio::task::spawn_blocking(move || merge_into(&staged, &dest, &stamp))
        .await
        .map_err(|e| FetchError::permanent(format!("merge task failed: {e}")))?
        .map_err(|e| FetchError::permanent(format!("failed to move snapshot into place: {e}")))
}

/// Place each `(relative, source)` file under `dest`, then write the marker.
///
/// Files are hard-linked out of the cache when possible and copied
/// otherwise. Each lands under a `.partial` name before being renamed.
pub(crate) fn merge_into(files: &[(PathBuf, PathBuf)], dest: &Path, stamp: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for (relative, source) in files {
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let source = std::fs::canonicalize(source)?;
        let tmp = partial_path(&target);
        let _ = std::fs::remove_file(&tmp);
        if std::fs::hard_link(&source, &tmp).is_err() {
            std::fs::copy(&source, &tmp)?;
        }
        // Renaming onto a link to the same inode is a no-op that leaves `tmp`.
        if target.exists() {
            std::fs::remove_file(&target)?;
        }
        std::fs::rename(&tmp, &target)?;
    }
    std::fs::write(dest.join(COMPLETE_MARKER), stamp)
}

fn classify(context: &str, e: ApiError) -> FetchError {
    match e {
        ApiError::RequestError(ref err) => match err.status() {
            Some(status) => FetchError::from_code(status.as_u16(), &format!("{context}: {e}")),
            // Connection resets, DNS failures, timeouts.
            None => FetchError::transient(format!("{context}: {e}")),
        },
        ApiError::TooManyRetries(_) => FetchError::transient(format!("{context}: {e}")),
        e => FetchError::permanent(format!("{context}: {e}")),
    }
}

fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::is_complete;
    use std::fs;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn merges_into_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("a"), b"01_MorphableModel").unwrap();
        fs::write(cache.join("b"), b"exp_info").unwrap();

        let dest = dir.path().join("repo/deep_3drecon/BFM");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join(".gitkeep"), b"").unwrap();
        fs::write(dest.join("README.md"), b"placeholder").unwrap();
        assert!(!is_complete(&dest));

        let files = vec![
            (PathBuf::from("01_MorphableModel.mat"), cache.join("a")),
            (PathBuf::from("sub/Exp_Pca.bin"), cache.join("b")),
        ];
        merge_into(&files, &dest, "org/bfm@abc\n").unwrap();

        assert_eq!(fs::read(dest.join("01_MorphableModel.mat")).unwrap(), b"01_MorphableModel");
        assert_eq!(fs::read(dest.join("sub/Exp_Pca.bin")).unwrap(), b"exp_info");
        assert!(dest.join(".gitkeep").exists());
        assert_eq!(fs::read(dest.join("README.md")).unwrap(), b"placeholder");
        assert!(!partial_path(&dest.join("01_MorphableModel.mat")).exists());
        assert!(is_complete(&dest));

        // A second merge over the same files is harmless.
        merge_into(&files, &dest, "org/bfm@abc\n").unwrap();
        assert!(!partial_path(&dest.join("sub/Exp_Pca.bin")).exists());
        assert_eq!(fs::read(dest.join("sub/Exp_Pca.bin")).unwrap(), b"exp_info");
    }

    #[test]
    fn missing_cache_file_is_an_error_and_leaves_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("BFM");
        let files = vec![(PathBuf::from("x.bin"), dir.path().join("gone"))];

        assert!(merge_into(&files, &dest, "").is_err());
        assert!(!is_complete(&dest));
    }

    #[test]
    fn safe_relative_paths() {
        assert!(is_safe_relative(Path::new("a/b.bin")));
        assert!(!is_safe_relative(Path::new("../a")));
        assert!(!is_safe_relative(Path::new("/abs")));
        assert!(!is_safe_relative(Path::new("")));
    }

    async fn mount_file(server: &MockServer, file: &str, body: &'static [u8]) {
        let url = format!("/org/bfm/resolve/main/{file}");
        Mock::given(method("GET"))
            .and(path(url.as_str()))
            .and(header("range", "bytes=0-0"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("x-repo-commit", "abc123")
                    .insert_header("etag", format!("\"{file}-etag\"").as_str())
                    .insert_header("content-range", format!("bytes 0-0/{}", body.len()).as_str())
                    .set_body_bytes(&body[..1]),
            )
            .with_priority(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(url.as_str()))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", format!("bytes 0-{}/{}", body.len() - 1, body.len()).as_str())
                    .set_body_bytes(body),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn snapshot_lands_in_existing_directory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models/org/bfm/revision/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha": "abc123",
                "siblings": [{"rfilename": "BFM_model_front.mat"}]
            })))
            .mount(&server)
            .await;
        mount_file(&server, "BFM_model_front.mat", b"front-model").await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("Real3DPortrait/deep_3drecon/BFM");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join(".gitkeep"), b"").unwrap();

        fetch_snapshot(&server.uri(), &dir.path().join("cache"), "org/bfm", "main", &dest, None)
            .await
            .unwrap();

        assert_eq!(fs::read(dest.join("BFM_model_front.mat")).unwrap(), b"front-model");
        assert!(dest.join(".gitkeep").exists());
        assert!(is_complete(&dest));
    }

    #[tokio::test]
    async fn unknown_repository_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models/org/missing/revision/main"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = fetch_snapshot(
            &server.uri(),
            &dir.path().join("cache"),
            "org/missing",
            "main",
            &dir.path().join("dest"),
            None,
        )
        .await
        .unwrap_err();
        assert!(!err.transient, "got: {err}");
    }

    #[tokio::test]
    async fn snapshot_rejects_path_traversal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models/evil/repo/revision/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha": "abc",
                "siblings": [{"rfilename": "../../etc/passwd"}]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = fetch_snapshot(
            &server.uri(),
            &dir.path().join("cache"),
            "evil/repo",
            "main",
            &dir.path().join("evil"),
            None,
        )
        .await
        .unwrap_err();
        assert!(!err.transient);
    }
}
