//! Content-addressed blob store for full context bodies.
//!
//! The blob store holds the serialized context keyed by context id. It is the
//! read path of record for `get`; the index only serves listings.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use toolmesh_core::{MeshResult, StorageError};

/// Blob store trait. Values are opaque serialized context bodies.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store (or replace) the body for a context id.
    async fn put(&self, context_id: &str, body: Vec<u8>) -> MeshResult<()>;

    /// Fetch the body. `NotFound` when absent.
    async fn get(&self, context_id: &str) -> MeshResult<Vec<u8>>;

    /// Delete the body. Deleting an absent id is `NotFound`.
    async fn delete(&self, context_id: &str) -> MeshResult<()>;
}

/// In-memory blob store.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, context_id: &str, body: Vec<u8>) -> MeshResult<()> {
        self.blobs
            .write()
            .await
            .insert(context_id.to_string(), body);
        Ok(())
    }

    async fn get(&self, context_id: &str) -> MeshResult<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(context_id)
            .cloned()
            .ok_or_else(|| {
                StorageError::NotFound {
                    entity: "context",
                    id: context_id.to_string(),
                }
                .into()
            })
    }

    async fn delete(&self, context_id: &str) -> MeshResult<()> {
        match self.blobs.write().await.remove(context_id) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound {
                entity: "context",
                id: context_id.to_string(),
            }
            .into()),
        }
    }
}

/// Filesystem blob store: one file per context under a root directory.
///
/// Context ids are UUID-shaped, so they are safe as file names; ids are still
/// rejected if they try to escape the root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, context_id: &str) -> MeshResult<PathBuf> {
        if context_id.is_empty()
            || context_id.contains(['/', '\\'])
            || context_id.contains("..")
        {
            return Err(StorageError::WriteFailed {
                entity: "context",
                id: context_id.to_string(),
                reason: "invalid blob key".to_string(),
            }
            .into());
        }
        Ok(self.root.join(format!("{context_id}.json")))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, context_id: &str, body: Vec<u8>) -> MeshResult<()> {
        let path = self.path_for(context_id)?;
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            StorageError::Unavailable {
                reason: format!("create blob root: {e}"),
            }
        })?;
        // Write to a temp file then rename so readers never observe a torn body.
        let tmp = self.root.join(format!("{context_id}.json.tmp"));
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| StorageError::WriteFailed {
                entity: "context",
                id: context_id.to_string(),
                reason: e.to_string(),
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::WriteFailed {
                entity: "context",
                id: context_id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn get(&self, context_id: &str) -> MeshResult<Vec<u8>> {
        let path = self.path_for(context_id)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                entity: "context",
                id: context_id.to_string(),
            }
            .into()),
            Err(e) => Err(StorageError::ReadFailed {
                entity: "context",
                id: context_id.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    async fn delete(&self, context_id: &str) -> MeshResult<()> {
        let path = self.path_for(context_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                entity: "context",
                id: context_id.to_string(),
            }
            .into()),
            Err(e) => Err(StorageError::DeleteFailed {
                entity: "context",
                id: context_id.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }
}
