//! Embedding store: dimension-tagged vector persistence and cosine search.
//!
//! Similarity math stays in the storage layer; callers only see ranked
//! results. Per-tenant model selection and quota accounting also live here,
//! next to the usage counters they gate on.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use toolmesh_core::{
    cosine_similarity, model_by_id, supported_models, Embedding, EmbeddingModel, MeshResult,
    ModelUsage, QuotaError, TenantEmbeddingConfig, VectorError,
};
use tracing::warn;

// ============================================================================
// SEARCH TYPES
// ============================================================================

/// Hard bounds on search result counts.
pub const SEARCH_LIMIT_MIN: usize = 1;
pub const SEARCH_LIMIT_MAX: usize = 100;
pub const SEARCH_LIMIT_DEFAULT: usize = 10;

/// Similarity threshold applied when a model is specified and the caller
/// provides none.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;

/// A similarity search request.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    /// Restrict to one context when set.
    pub context_id: Option<String>,
    /// Restrict to one model when set. The model-less path is the legacy
    /// behavior: it scans every embedding of the context and skips candidates
    /// whose dimensionality differs from the query.
    pub model_id: Option<String>,
    pub limit: Option<usize>,
    pub similarity_threshold: Option<f32>,
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub embedding: Embedding,
    pub similarity: f32,
}

/// Clamp a requested limit into `[1, 100]`, defaulting to 10.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(SEARCH_LIMIT_DEFAULT)
        .clamp(SEARCH_LIMIT_MIN, SEARCH_LIMIT_MAX)
}

/// Inputs to tenant model selection.
#[derive(Debug, Clone, Default)]
pub struct ModelSelection {
    pub agent_id: Option<String>,
    /// Advisory; selection rules do not currently branch on it.
    pub task_type: Option<String>,
    pub requested_model: Option<String>,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Embedding persistence and search.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Persist an embedding keyed by `(context_id, content_index, model_id)`.
    /// Validates the vector length against `vector_dimensions` and the
    /// model's declared dimensionality.
    async fn store(&self, embedding: Embedding) -> MeshResult<()>;

    /// Cosine-similarity search, descending similarity.
    async fn search(&self, query: SearchQuery) -> MeshResult<Vec<SearchResult>>;

    /// All embeddings of a context, ordered by `(content_index, model_id)`.
    async fn get_by_context(&self, context_id: &str) -> MeshResult<Vec<Embedding>>;

    /// Delete all embeddings of a context. Returns how many were deleted.
    async fn delete_by_context(&self, context_id: &str) -> MeshResult<u64>;

    /// Embeddings of a context restricted to one model.
    async fn get_by_model(&self, context_id: &str, model_id: &str) -> MeshResult<Vec<Embedding>>;

    /// Delete a context's embeddings for one model. Returns the count.
    async fn delete_by_model(&self, context_id: &str, model_id: &str) -> MeshResult<u64>;

    /// Models the server ships support for.
    fn list_supported_models(&self) -> Vec<EmbeddingModel>;

    /// Choose a model for a tenant per the selection rules:
    /// requested → agent preference → tenant default → highest priority,
    /// each gated by the entry's quotas against live usage.
    async fn select_model(
        &self,
        config: &TenantEmbeddingConfig,
        selection: &ModelSelection,
    ) -> MeshResult<String>;

    /// Record usage against a tenant/model pair.
    async fn record_usage(&self, tenant_id: &str, model_id: &str, tokens: u64) -> MeshResult<()>;
}

// ============================================================================
// IN-MEMORY IMPLEMENTATION
// ============================================================================

#[derive(Default)]
struct EmbeddingState {
    /// Key: (context_id, content_index, model_id).
    rows: HashMap<(String, i32, String), Embedding>,
    /// Dimensions fixed by the first write per model, for models not in the
    /// shipped catalog.
    observed_dims: HashMap<String, i32>,
    /// Usage counters keyed by (tenant_id, model_id).
    usage: HashMap<(String, String), ModelUsage>,
}

/// In-memory embedding store.
#[derive(Default)]
pub struct InMemoryEmbeddingStore {
    state: RwLock<EmbeddingState>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Usage snapshot for a tenant/model pair.
    pub async fn usage(&self, tenant_id: &str, model_id: &str) -> ModelUsage {
        self.state
            .read()
            .await
            .usage
            .get(&(tenant_id.to_string(), model_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

/// Declared dimensionality for a model: the shipped catalog wins; otherwise
/// the first stored vector fixes it.
fn declared_dims(state: &EmbeddingState, model_id: &str) -> Option<i32> {
    model_by_id(model_id)
        .map(|m| m.dimensions)
        .or_else(|| state.observed_dims.get(model_id).copied())
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn store(&self, embedding: Embedding) -> MeshResult<()> {
        embedding.validate()?;

        let mut state = self.state.write().await;
        match declared_dims(&state, &embedding.model_id) {
            Some(declared) if declared != embedding.vector_dimensions => {
                return Err(VectorError::ModelDimensionMismatch {
                    model_id: embedding.model_id.clone(),
                    declared,
                    got: embedding.vector_dimensions,
                }
                .into());
            }
            Some(_) => {}
            None => {
                state
                    .observed_dims
                    .insert(embedding.model_id.clone(), embedding.vector_dimensions);
            }
        }

        let key = (
            embedding.context_id.clone(),
            embedding.content_index,
            embedding.model_id.clone(),
        );
        state.rows.insert(key, embedding);
        Ok(())
    }

    async fn search(&self, query: SearchQuery) -> MeshResult<Vec<SearchResult>> {
        let limit = clamp_limit(query.limit);
        let threshold = match (query.similarity_threshold, &query.model_id) {
            (Some(t), _) => t,
            (None, Some(_)) => DEFAULT_SIMILARITY_THRESHOLD,
            (None, None) => 0.0,
        };

        let state = self.state.read().await;
        let mut results = Vec::new();
        for embedding in state.rows.values() {
            if let Some(ref context_id) = query.context_id {
                if &embedding.context_id != context_id {
                    continue;
                }
            }
            if let Some(ref model_id) = query.model_id {
                if &embedding.model_id != model_id {
                    continue;
                }
            }
            if embedding.vector.len() != query.vector.len() {
                // Legacy model-less path over mixed-model contexts: partition
                // out foreign dimensionalities instead of failing the search.
                warn!(
                    context_id = %embedding.context_id,
                    model_id = %embedding.model_id,
                    got = embedding.vector.len(),
                    want = query.vector.len(),
                    "skipping embedding with mismatched dimensions"
                );
                continue;
            }

            let similarity = cosine_similarity(&query.vector, &embedding.vector)?;
            if similarity >= threshold {
                results.push(SearchResult {
                    embedding: embedding.clone(),
                    similarity,
                });
            }
        }

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn get_by_context(&self, context_id: &str) -> MeshResult<Vec<Embedding>> {
        let state = self.state.read().await;
        let mut rows: Vec<Embedding> = state
            .rows
            .values()
            .filter(|e| e.context_id == context_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.content_index, &a.model_id).cmp(&(b.content_index, &b.model_id))
        });
        Ok(rows)
    }

    async fn delete_by_context(&self, context_id: &str) -> MeshResult<u64> {
        let mut state = self.state.write().await;
        let before = state.rows.len();
        state.rows.retain(|(ctx, _, _), _| ctx != context_id);
        Ok((before - state.rows.len()) as u64)
    }

    async fn get_by_model(&self, context_id: &str, model_id: &str) -> MeshResult<Vec<Embedding>> {
        let state = self.state.read().await;
        let mut rows: Vec<Embedding> = state
            .rows
            .values()
            .filter(|e| e.context_id == context_id && e.model_id == model_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.content_index);
        Ok(rows)
    }

    async fn delete_by_model(&self, context_id: &str, model_id: &str) -> MeshResult<u64> {
        let mut state = self.state.write().await;
        let before = state.rows.len();
        state
            .rows
            .retain(|(ctx, _, model), _| !(ctx == context_id && model == model_id));
        Ok((before - state.rows.len()) as u64)
    }

    fn list_supported_models(&self) -> Vec<EmbeddingModel> {
        supported_models()
    }

    async fn select_model(
        &self,
        config: &TenantEmbeddingConfig,
        selection: &ModelSelection,
    ) -> MeshResult<String> {
        let state = self.state.read().await;
        let usage_of = |model_id: &str| -> ModelUsage {
            state
                .usage
                .get(&(config.tenant_id.clone(), model_id.to_string()))
                .cloned()
                .unwrap_or_default()
        };

        let mut candidates = Vec::new();
        if let Some(ref requested) = selection.requested_model {
            if let Some(entry) = config.enabled_entry(requested) {
                candidates.push(entry);
            }
        }
        if let Some(ref agent_id) = selection.agent_id {
            if let Some(entry) = config.agent_preference(agent_id) {
                candidates.push(entry);
            }
        }
        if let Some(entry) = config.default_entry() {
            candidates.push(entry);
        }
        // Final fallback: every enabled model in descending priority, so an
        // over-quota front-runner still leaves the tenant operational.
        let mut by_priority: Vec<_> = config.models.iter().filter(|m| m.enabled).collect();
        by_priority.sort_by_key(|m| std::cmp::Reverse(m.priority));
        candidates.extend(by_priority);

        if candidates.is_empty() {
            return Err(QuotaError::NoModelAvailable {
                tenant_id: config.tenant_id.clone(),
            }
            .into());
        }

        let mut last_quota_err = None;
        for entry in candidates {
            match entry.check_quota(&usage_of(&entry.model_id)) {
                Ok(()) => return Ok(entry.model_id.clone()),
                Err(e) => last_quota_err = Some(e),
            }
        }

        // Every candidate was over quota.
        Err(last_quota_err
            .unwrap_or(QuotaError::NoModelAvailable {
                tenant_id: config.tenant_id.clone(),
            })
            .into())
    }

    async fn record_usage(&self, tenant_id: &str, model_id: &str, tokens: u64) -> MeshResult<()> {
        let mut state = self.state.write().await;
        let usage = state
            .usage
            .entry((tenant_id.to_string(), model_id.to_string()))
            .or_default();
        usage.monthly_tokens += tokens;
        usage.daily_tokens += tokens;
        usage.monthly_requests += 1;
        Ok(())
    }
}

// ============================================================================
// TENANT CONFIG REGISTRY
// ============================================================================

/// In-memory registry of tenant embedding rosters.
#[derive(Default)]
pub struct TenantConfigRegistry {
    configs: RwLock<HashMap<String, TenantEmbeddingConfig>>,
}

impl TenantConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a tenant's roster, replacing any existing one.
    pub async fn put(&self, config: TenantEmbeddingConfig) -> MeshResult<()> {
        config.validate().map_err(toolmesh_core::MeshError::Validation)?;
        self.configs
            .write()
            .await
            .insert(config.tenant_id.clone(), config);
        Ok(())
    }

    pub async fn get(&self, tenant_id: &str) -> MeshResult<TenantEmbeddingConfig> {
        self.configs
            .read()
            .await
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| {
                toolmesh_core::StorageError::NotFound {
                    entity: "tenant",
                    id: tenant_id.to_string(),
                }
                .into()
            })
    }
}

// ============================================================================
// TESTS
// ============================================================================
