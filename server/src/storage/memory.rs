//! In-process object store, used to drive the delivery path in tests.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use eyre::eyre;
use futures::{StreamExt as _, stream};

use crate::storage::{ObjectMetadata, ObjectStore, ObjectStream, StorageError};

/// Size of the chunks [`MemoryStore::content`] yields.
const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// Metadata lookups fail with a backend error.
    Metadata,
    /// The content stream fails after its first chunk.
    MidStream,
}

#[derive(Debug, Clone)]
struct StoredObject {
    metadata: ObjectMetadata,
    data: Bytes,
    fault: Option<Fault>,
}

#[derive(Debug, Default)]
#[expect(
    clippy::module_name_repetitions,
    reason = "Re-exported from `storage`, where the prefix names the backend"
)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    /// Keys passed to [`ObjectStore::metadata`], in call order.
    lookups: RwLock<Vec<String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, key: &str, object: StoredObject) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(key.to_owned(), object);
        }
    }

    /// Stores `data` under `key`. The size is taken from `data`.
    pub fn insert(&self, key: &str, data: impl Into<Bytes>, metadata: ObjectMetadata) {
        let data = data.into();
        self.put(
            key,
            StoredObject {
                metadata: ObjectMetadata {
                    size: data.len() as u64,
                    ..metadata
                },
                data,
                fault: None,
            },
        );
    }

    /// Registers `key` so that its metadata lookup fails with a backend error.
    pub fn insert_unavailable(&self, key: &str) {
        self.put(
            key,
            StoredObject {
                metadata: ObjectMetadata::default(),
                data: Bytes::new(),
                fault: Some(Fault::Metadata),
            },
        );
    }

    /// Stores `data` under `key`, but its content stream fails after the first chunk.
    pub fn insert_truncated(&self, key: &str, data: impl Into<Bytes>, metadata: ObjectMetadata) {
        let data = data.into();
        self.put(
            key,
            StoredObject {
                metadata: ObjectMetadata {
                    size: data.len() as u64,
                    ..metadata
                },
                data,
                fault: Some(Fault::MidStream),
            },
        );
    }

    /// Keys looked up so far, in call order.
    #[must_use]
    pub fn lookups(&self) -> Vec<String> {
        self.lookups
            .read()
            .map(|lookups| lookups.clone())
            .unwrap_or_default()
    }

    fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        self.objects
            .read()
            .map_err(|_| StorageError::backend(key, eyre!("memory store lock poisoned")))?
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_owned()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        if let Ok(mut lookups) = self.lookups.write() {
            lookups.push(key.to_owned());
        }
        let object = self.get(key)?;
        if object.fault == Some(Fault::Metadata) {
            return Err(StorageError::backend(key, eyre!("injected metadata failure")));
        }
        Ok(object.metadata)
    }

    async fn content(&self, key: &str) -> Result<ObjectStream, StorageError> {
        let object = self.get(key)?;
        let data = object.data;
        let mut chunks: Vec<Result<Bytes, StorageError>> = (0..data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..data.len().min(start + CHUNK_SIZE))))
            .collect();
        if object.fault == Some(Fault::MidStream) {
            chunks.truncate(1);
            chunks.push(Err(StorageError::backend(
                key,
                eyre!("injected mid-stream failure"),
            )));
        }
        Ok(stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt as _;

    use super::*;

    #[tokio::test]
    async fn serves_inserted_objects_in_chunks() {
        let store = MemoryStore::new();
        store.insert(
            "big.bin",
            vec![7_u8; CHUNK_SIZE * 2 + 1],
            ObjectMetadata::default(),
        );

        assert_eq!(
            store.metadata("big.bin").await.unwrap().size,
            (CHUNK_SIZE * 2 + 1) as u64
        );
        let chunks: Vec<Bytes> = store
            .content("big.bin")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(sizes, [CHUNK_SIZE, CHUNK_SIZE, 1]);
        assert_eq!(store.lookups(), ["big.bin"]);
    }

    #[tokio::test]
    async fn missing_and_faulty_objects() {
        let store = MemoryStore::new();
        store.insert_unavailable("flaky");
        assert!(matches!(
            store.metadata("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.metadata("flaky").await,
            Err(StorageError::Backend { .. })
        ));
    }
}
