//! # sr-store
//!
//! Moves files between the local filesystem and the durable shared store.
//!
//! - **[`local_store`]** -- directory-rooted store (a mounted volume).
//! - **[`http_store`]** -- `PUT`/`GET` against `{endpoint}/files/{path}`.
//! - **[`ArtifactTransferService`]** -- size-verified uploads and atomic
//!   downloads producing [`TransferRecord`](sr_core::TransferRecord)s.

pub mod store;
pub mod transfer;

pub use object_store::ObjectStore;
pub use store::{http_store, local_store, object_path};
pub use transfer::ArtifactTransferService;

use std::sync::Arc;

use sr_core::config::{StoreConfig, StoreKind};

/// Build the store selected in configuration.
pub fn from_config(config: &StoreConfig, token: Option<String>) -> sr_core::Result<Arc<dyn ObjectStore>> {
    match config.kind {
        StoreKind::Local => local_store(&config.root),
        StoreKind::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                sr_core::Error::Configuration("store.endpoint is required for the http store".into())
            })?;
            http_store(endpoint, token.as_deref())
        }
    }
}
