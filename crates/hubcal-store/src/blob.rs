//! Named byte blobs grouped in containers.
//!
//! A hub's container holds its event stores, stats and ICS exports.

use std::collections::HashMap;

use hubcal_core::BoxFuture;
use tokio::sync::RwLock;

use crate::error::StoreResult;

/// A blob store.
pub trait BlobStore: Send + Sync {
    /// Writes a blob, replacing any previous content.
    fn put(&self, container: &str, name: &str, bytes: Vec<u8>) -> BoxFuture<'_, StoreResult<()>>;

    /// Reads a blob.
    fn get(&self, container: &str, name: &str) -> BoxFuture<'_, StoreResult<Option<Vec<u8>>>>;

    /// Returns true if the blob exists.
    fn exists(&self, container: &str, name: &str) -> BoxFuture<'_, StoreResult<bool>>;
}

/// In-process blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, container: &str, name: &str, bytes: Vec<u8>) -> BoxFuture<'_, StoreResult<()>> {
        let key = (container.to_string(), name.to_string());
        Box::pin(async move {
            self.blobs.write().await.insert(key, bytes);
            Ok(())
        })
    }

    fn get(&self, container: &str, name: &str) -> BoxFuture<'_, StoreResult<Option<Vec<u8>>>> {
        let key = (container.to_string(), name.to_string());
        Box::pin(async move { Ok(self.blobs.read().await.get(&key).cloned()) })
    }

    fn exists(&self, container: &str, name: &str) -> BoxFuture<'_, StoreResult<bool>> {
        let key = (container.to_string(), name.to_string());
        Box::pin(async move { Ok(self.blobs.read().await.contains_key(&key)) })
    }
}
