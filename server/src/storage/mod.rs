//! Object storage backends.
//!
//! The delivery path only needs two operations per object: fetch its metadata and
//! stream its bytes. [`GcsStore`] talks to the Cloud Storage JSON API and
//! [`MemoryStore`] keeps objects in process for tests.

mod gcs;
mod memory;

use alloc::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

pub use gcs::GcsStore;
pub use memory::MemoryStore;

use crate::config::StorageConfig;

/// Stream of object bytes as delivered by the backend.
pub type ObjectStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Per-request metadata of a stored object. Never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Stored size in bytes.
    pub size: u64,
    pub content_type: String,
    pub content_encoding: String,
    pub content_disposition: String,
    pub cache_control: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
#[expect(
    clippy::module_name_repetitions,
    reason = "Used outside this module next to other error types"
)]
pub enum StorageError {
    #[error("object `{0}` does not exist")]
    NotFound(String),
    #[error("storage backend failed for `{key}`")]
    Backend {
        key: String,
        #[source]
        source: eyre::Report,
    },
}

impl StorageError {
    pub(crate) fn backend(key: &str, source: impl Into<eyre::Report>) -> Self {
        Self::Backend {
            key: key.to_owned(),
            source: source.into(),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Looks up the metadata of `key`.
    async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError>;

    /// Opens the content of `key` as a stream of byte chunks.
    async fn content(&self, key: &str) -> Result<ObjectStream, StorageError>;
}

/// Builds the Cloud Storage backend for `bucket`.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn build_store(bucket: &str, config: &StorageConfig) -> eyre::Result<Arc<dyn ObjectStore>> {
    Ok(Arc::new(GcsStore::new(bucket, config)?))
}
