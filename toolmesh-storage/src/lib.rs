//! Toolmesh Storage - Storage Tiers and In-Memory Implementations
//!
//! Defines the storage abstraction layer for contexts and embeddings: the
//! byte cache, the relational index of references, the blob store holding
//! full bodies, and the embedding store. In-memory implementations back tests
//! and single-node deployments; the Postgres index store backs production
//! listings.

pub mod blob;
pub mod cache;
pub mod embeddings;
pub mod index;
pub mod repository;

pub use blob::{BlobStore, FsBlobStore, InMemoryBlobStore};
pub use cache::{Cache, CacheStats, InMemoryCache};
pub use embeddings::{
    clamp_limit, EmbeddingStore, InMemoryEmbeddingStore, ModelSelection, SearchQuery,
    SearchResult, TenantConfigRegistry, DEFAULT_SIMILARITY_THRESHOLD, SEARCH_LIMIT_DEFAULT,
    SEARCH_LIMIT_MAX, SEARCH_LIMIT_MIN,
};
pub use index::{ContextRef, InMemoryIndexStore, IndexStore, PgIndexConfig, PgIndexStore};
pub use repository::ContextRepository;
