//! Size-verified uploads and atomic downloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::TryStreamExt;
use object_store::{ObjectStore, ObjectStoreExt, PutPayloadMut};
use sr_core::{Direction, TransferRecord};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::store::{object_path, store_error};

/// Moves files between the local filesystem and an [`ObjectStore`].
#[derive(Clone)]
pub struct ArtifactTransferService {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactTransferService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Copy `local_path` into the store at `remote_path`.
    ///
    /// # Errors
    ///
    /// Returns [`sr_core::Error::Transfer`] when the local file cannot be
    /// read, the store rejects the write, or the bytes read, the bytes the
    /// store holds afterwards and the file length disagree.
    pub async fn upload(&self, local_path: &Path, remote_path: &str) -> sr_core::Result<TransferRecord> {
        let remote = object_path(remote_path)?;
        let local_display = local_path.display().to_string();

        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| sr_core::Error::transfer(&local_display, format!("cannot open: {e}")))?;
        let length = file
            .metadata()
            .await
            .map_err(|e| sr_core::Error::transfer(&local_display, format!("cannot stat: {e}")))?
            .len();

        tracing::info!(
            local = %local_display,
            remote = %remote,
            store = %self.store,
            bytes = length,
            "Uploading"
        );

        // The HTTP store has no multipart support, so the body goes up whole.
        let mut payload = PutPayloadMut::new();
        let mut chunks = ReaderStream::new(file);
        let mut read = 0u64;
        while let Some(chunk) = chunks
            .try_next()
            .await
            .map_err(|e| sr_core::Error::transfer(&local_display, format!("read failed: {e}")))?
        {
            read += chunk.len() as u64;
            payload.push(chunk);
        }
        if read != length {
            return Err(sr_core::Error::transfer(
                local_display,
                format!("read {read} bytes but the file is {length} bytes"),
            ));
        }

        self.store
            .put(&remote, payload.freeze())
            .await
            .map_err(|e| store_error(&remote, e))?;
        let written = self
            .store
            .head(&remote)
            .await
            .map_err(|e| store_error(&remote, e))?
            .size;

        let record = TransferRecord::new(local_path, remote.as_ref(), Direction::Upload, written);
        record.verify(length)?;

        tracing::info!(remote = %remote, bytes = written, "Upload complete");
        Ok(record)
    }

    /// Fetch `remote_path` from the store into `local_path`.
    ///
    /// All chunks are written to a temporary sibling first; the destination
    /// only appears once the full object has arrived. Missing parent
    /// directories are created.
    pub async fn download(&self, remote_path: &str, local_path: &Path) -> sr_core::Result<TransferRecord> {
        let remote = object_path(remote_path)?;
        let result = self
            .store
            .get(&remote)
            .await
            .map_err(|e| store_error(&remote, e))?;
        let expected = result.meta.size;

        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = temp_sibling(local_path);

        tracing::info!(
            remote = %remote,
            local = %local_path.display(),
            store = %self.store,
            bytes = expected,
            "Downloading"
        );

        let mut chunks = result.into_stream();
        let written: sr_core::Result<u64> = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            let mut received = 0u64;
            while let Some(chunk) = chunks
                .try_next()
                .await
                .map_err(|e| store_error(&remote, e))?
            {
                file.write_all(&chunk).await?;
                received += chunk.len() as u64;
            }
            file.sync_all().await?;
            Ok(received)
        }
        .await;

        let received = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(sr_core::Error::transfer(remote.as_ref(), format!("download failed: {e}")));
            }
        };

        let record = TransferRecord::new(local_path, remote.as_ref(), Direction::Download, received);
        if let Err(e) = record.verify(expected) {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        tokio::fs::rename(&tmp, local_path).await?;
        tracing::info!(local = %local_path.display(), bytes = received, "Download complete");
        Ok(record)
    }
}

/// Hidden, unique temporary name next to `path`.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".into());
    path.with_file_name(format!(".{name}.{}.part", uuid::Uuid::new_v4().simple()))
}
