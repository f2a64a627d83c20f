//! Store construction and path handling on top of `object_store`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use object_store::http::HttpBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{BackoffConfig, ClientOptions, ObjectStore, RetryConfig};

fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        backoff: BackoffConfig {
            init_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(60),
    }
}

/// Directory-rooted store, used when the shared volume is mounted locally.
///
/// The root is created when missing. Writes land in a temporary file and
/// are renamed into place.
pub fn local_store(root: &Path) -> sr_core::Result<Arc<dyn ObjectStore>> {
    std::fs::create_dir_all(root)?;
    let store = LocalFileSystem::new_with_prefix(root).map_err(|e| {
        sr_core::Error::Configuration(format!("invalid store root {}: {e}", root.display()))
    })?;
    tracing::debug!(root = %root.display(), "Using local store");
    Ok(Arc::new(store))
}

/// Store reachable over HTTP: objects live at `{endpoint}/files/{path}`.
///
/// `token` is sent as a bearer token on every request.
pub fn http_store(endpoint: &str, token: Option<&str>) -> sr_core::Result<Arc<dyn ObjectStore>> {
    let mut options = ClientOptions::new().with_connect_timeout(Duration::from_secs(30));
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| sr_core::Error::Configuration("store token is not a valid header value".into()))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        options = options.with_default_headers(headers);
    }

    let url = format!("{}/files", endpoint.trim_end_matches('/'));
    let store = HttpBuilder::new()
        .with_url(url.as_str())
        .with_client_options(options)
        .with_retry(create_retry_config())
        .build()
        .map_err(|e| sr_core::Error::Configuration(format!("invalid store endpoint {endpoint}: {e}")))?;
    tracing::debug!(url, "Using HTTP store");
    Ok(Arc::new(store))
}

/// Parse a `/`-separated store path.
///
/// A leading `/` is ignored.
///
/// # Errors
///
/// Returns [`sr_core::Error::Transfer`] for empty paths and for `.`, `..`
/// or empty segments.
pub fn object_path(path: &str) -> sr_core::Result<ObjectPath> {
    let parsed = ObjectPath::parse(path)
        .map_err(|e| sr_core::Error::transfer(path, format!("invalid store path: {e}")))?;
    if parsed.as_ref().is_empty() {
        return Err(sr_core::Error::transfer(path, "empty store path"));
    }
    Ok(parsed)
}

/// Map a store failure onto [`sr_core::Error::Transfer`].
pub(crate) fn store_error(path: &ObjectPath, e: object_store::Error) -> sr_core::Error {
    match e {
        object_store::Error::NotFound { .. } => {
            sr_core::Error::transfer(path.as_ref(), "object not found in store")
        }
        e => sr_core::Error::transfer(path.as_ref(), e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::ObjectStoreExt;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_store_paths() {
        assert_eq!(object_path("/inputs/a.png").unwrap().as_ref(), "inputs/a.png");
        assert_eq!(object_path("out.mp4").unwrap().as_ref(), "out.mp4");
    }

    #[test]
    fn rejects_traversal_and_empty() {
        assert!(object_path("../etc/passwd").is_err());
        assert!(object_path("inputs/../../x").is_err());
        assert!(object_path("inputs/./x").is_err());
        assert!(object_path("/").is_err());
        assert!(object_path("").is_err());
    }

    #[tokio::test]
    async fn local_store_creates_its_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("volume/store");
        let store = local_store(&root).unwrap();

        let location = object_path("inputs/a.bin").unwrap();
        store.put(&location, Bytes::from_static(b"hello").into()).await.unwrap();
        assert_eq!(std::fs::read(root.join("inputs/a.bin")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn missing_object_is_a_transfer_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = local_store(dir.path()).unwrap();
        let location = object_path("nope.bin").unwrap();

        let err = store.get(&location).await.unwrap_err();
        let err = store_error(&location, err);
        assert!(matches!(err, sr_core::Error::Transfer { .. }));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn http_put_sends_body_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/files/inputs/face.png"))
            .and(header("authorization", "Bearer store-token"))
            .and(body_bytes(b"png-bytes".to_vec()))
            .respond_with(ResponseTemplate::new(201).insert_header("etag", "\"v1\""))
            .expect(1)
            .mount(&server)
            .await;

        let store = http_store(&server.uri(), Some("store-token")).unwrap();
        let location = object_path("inputs/face.png").unwrap();
        store
            .put(&location, Bytes::from_static(b"png-bytes").into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn http_get_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/output/result.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"v1\"")
                    .insert_header("last-modified", "Tue, 15 Nov 1994 08:12:31 GMT")
                    .set_body_bytes(b"mp4-data".to_vec()),
            )
            .mount(&server)
            .await;

        let store = http_store(&server.uri(), None).unwrap();
        let result = store.get(&object_path("output/result.mp4").unwrap()).await.unwrap();
        assert_eq!(result.meta.size, 8);
        assert_eq!(result.bytes().await.unwrap().as_ref(), b"mp4-data");
    }

    #[tokio::test]
    async fn http_missing_object_is_a_transfer_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = http_store(&server.uri(), None).unwrap();
        let location = object_path("missing.bin").unwrap();
        let err = store_error(&location, store.get(&location).await.unwrap_err());
        assert!(err.to_string().contains("not found"));
    }
}
