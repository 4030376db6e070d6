//! Write-through context repository.
//!
//! Consolidates the cache, index, and blob tiers behind one capability so the
//! context manager never orchestrates three stores directly. Ordering on
//! save: index reference first, then blob; a failed blob write rolls the
//! index reference back (best effort) and surfaces the storage error. The
//! cache is written last and never fails the operation.

use crate::{BlobStore, Cache, ContextRef, IndexStore};
use chrono::Utc;
use std::sync::Arc;
use toolmesh_core::{Context, ContextItem, ListOptions, MeshResult, StorageError};
use tracing::warn;

/// Cache key for a context body.
fn cache_key(context_id: &str) -> String {
    format!("context:{context_id}")
}

/// Two-tier context persistence with a write-through cache.
pub struct ContextRepository {
    cache: Arc<dyn Cache>,
    index: Arc<dyn IndexStore>,
    blobs: Arc<dyn BlobStore>,
}

impl ContextRepository {
    pub fn new(
        cache: Arc<dyn Cache>,
        index: Arc<dyn IndexStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            cache,
            index,
            blobs,
        }
    }

    /// Persist a context: index reference, then blob, then cache.
    pub async fn save(&self, ctx: &Context) -> MeshResult<()> {
        let body = serde_json::to_vec(ctx).map_err(|e| StorageError::WriteFailed {
            entity: "context",
            id: ctx.id.clone(),
            reason: format!("serialize: {e}"),
        })?;

        self.index.upsert(ctx).await?;

        if let Err(e) = self.blobs.put(&ctx.id, body.clone()).await {
            // Roll the reference back so listings never point at a missing body.
            if let Err(rollback) = self.index.delete(&ctx.id).await {
                warn!(
                    context_id = %ctx.id,
                    error = %rollback,
                    "failed to roll back index reference after blob write failure"
                );
            }
            return Err(e);
        }

        let ttl = ctx
            .cache_ttl(Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(
                toolmesh_core::DEFAULT_CACHE_TTL_SECS as u64,
            ));
        if let Err(e) = self.cache.set(&cache_key(&ctx.id), body, Some(ttl)).await {
            warn!(context_id = %ctx.id, error = %e, "cache write failed");
        }
        Ok(())
    }

    /// Load a context: cache first (miss and error both fall through), then
    /// blob, repopulating the cache on the way out.
    pub async fn load(&self, context_id: &str) -> MeshResult<Context> {
        match self.cache.get(&cache_key(context_id)).await {
            Ok(Some(body)) => match serde_json::from_slice::<Context>(&body) {
                Ok(ctx) => return Ok(ctx),
                Err(e) => {
                    warn!(context_id, error = %e, "corrupt cache entry, falling through");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(context_id, error = %e, "cache read failed, falling through");
            }
        }

        let body = self.blobs.get(context_id).await?;
        let ctx: Context =
            serde_json::from_slice(&body).map_err(|e| StorageError::ReadFailed {
                entity: "context",
                id: context_id.to_string(),
                reason: format!("deserialize: {e}"),
            })?;

        let ttl = ctx
            .cache_ttl(Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(
                toolmesh_core::DEFAULT_CACHE_TTL_SECS as u64,
            ));
        if let Err(e) = self.cache.set(&cache_key(context_id), body, Some(ttl)).await {
            warn!(context_id, error = %e, "cache repopulation failed");
        }
        Ok(ctx)
    }

    /// Remove a context from every tier. The blob delete decides the outcome;
    /// index and cache tails only warn.
    pub async fn remove(&self, context_id: &str) -> MeshResult<()> {
        self.blobs.delete(context_id).await?;

        if let Err(e) = self.index.delete(context_id).await {
            warn!(context_id, error = %e, "index delete failed after blob delete");
        }
        if let Err(e) = self.cache.delete(&cache_key(context_id)).await {
            warn!(context_id, error = %e, "cache delete failed after blob delete");
        }
        Ok(())
    }

    /// Lightweight references for listing.
    pub async fn list_refs(
        &self,
        agent_id: &str,
        session_id: Option<&str>,
        options: &ListOptions,
    ) -> MeshResult<Vec<ContextRef>> {
        self.index.list(agent_id, session_id, options).await
    }

    /// Item rows from the index.
    pub async fn items(&self, context_id: &str) -> MeshResult<Vec<ContextItem>> {
        self.index.items(context_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryBlobStore, InMemoryCache, InMemoryIndexStore};
    use async_trait::async_trait;

    fn repo() -> (
        ContextRepository,
        Arc<InMemoryCache>,
        Arc<InMemoryIndexStore>,
        Arc<InMemoryBlobStore>,
    ) {
        let cache = Arc::new(InMemoryCache::new());
        let index = Arc::new(InMemoryIndexStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        (
            ContextRepository::new(cache.clone(), index.clone(), blobs.clone()),
            cache,
            index,
            blobs,
        )
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let (repo, _, index, _) = repo();
        let ctx = Context::new("a1", "m1");
        repo.save(&ctx).await.unwrap();

        let loaded = repo.load(&ctx.id).await.unwrap();
        assert_eq!(loaded, ctx);
        assert!(index.get_ref(&ctx.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_load_survives_cache_eviction() {
        let (repo, cache, _, _) = repo();
        let ctx = Context::new("a1", "m1");
        repo.save(&ctx).await.unwrap();

        cache.delete(&cache_key(&ctx.id)).await.unwrap();
        let loaded = repo.load(&ctx.id).await.unwrap();
        assert_eq!(loaded.id, ctx.id);

        // The read repopulated the cache.
        assert!(cache.get(&cache_key(&ctx.id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_cascades() {
        let (repo, cache, index, blobs) = repo();
        let ctx = Context::new("a1", "m1");
        repo.save(&ctx).await.unwrap();

        repo.remove(&ctx.id).await.unwrap();
        assert!(blobs.get(&ctx.id).await.unwrap_err().is_not_found());
        assert!(index.get_ref(&ctx.id).await.unwrap_err().is_not_found());
        assert!(cache.get(&cache_key(&ctx.id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let (repo, _, _, _) = repo();
        assert!(repo.remove("missing").await.unwrap_err().is_not_found());
    }

    struct FailingBlobStore;

    #[async_trait]
    impl BlobStore for FailingBlobStore {
        async fn put(&self, context_id: &str, _body: Vec<u8>) -> MeshResult<()> {
            Err(StorageError::WriteFailed {
                entity: "context",
                id: context_id.to_string(),
                reason: "disk full".to_string(),
            }
            .into())
        }

        async fn get(&self, context_id: &str) -> MeshResult<Vec<u8>> {
            Err(StorageError::NotFound {
                entity: "context",
                id: context_id.to_string(),
            }
            .into())
        }

        async fn delete(&self, context_id: &str) -> MeshResult<()> {
            Err(StorageError::NotFound {
                entity: "context",
                id: context_id.to_string(),
            }
            .into())
        }
    }

    #[tokio::test]
    async fn test_blob_failure_rolls_back_index_reference() {
        let cache = Arc::new(InMemoryCache::new());
        let index = Arc::new(InMemoryIndexStore::new());
        let repo = ContextRepository::new(cache, index.clone(), Arc::new(FailingBlobStore));

        let ctx = Context::new("a1", "m1");
        assert!(repo.save(&ctx).await.is_err());

        // The dangling reference was rolled back.
        assert!(index.get_ref(&ctx.id).await.unwrap_err().is_not_found());
    }

    struct FailingCache;

    #[async_trait]
    impl Cache for FailingCache {
        async fn get(&self, _key: &str) -> MeshResult<Option<Vec<u8>>> {
            Err(StorageError::Unavailable {
                reason: "cache down".to_string(),
            }
            .into())
        }

        async fn set(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Option<std::time::Duration>,
        ) -> MeshResult<()> {
            Err(StorageError::Unavailable {
                reason: "cache down".to_string(),
            }
            .into())
        }

        async fn delete(&self, _key: &str) -> MeshResult<()> {
            Err(StorageError::Unavailable {
                reason: "cache down".to_string(),
            }
            .into())
        }
    }

    #[tokio::test]
    async fn test_cache_failures_are_non_fatal() {
        let index = Arc::new(InMemoryIndexStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let repo = ContextRepository::new(Arc::new(FailingCache), index, blobs);

        let ctx = Context::new("a1", "m1");
        repo.save(&ctx).await.unwrap();
        assert_eq!(repo.load(&ctx.id).await.unwrap().id, ctx.id);
        repo.remove(&ctx.id).await.unwrap();
    }
}
