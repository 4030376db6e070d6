//! Embedding vector routes.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use toolmesh_core::{Embedding, EmbeddingModel, TenantEmbeddingConfig};
use toolmesh_storage::{ModelSelection, SearchQuery};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct VectorSearchRequest {
    pub query_vector: Vec<f32>,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorSearchHit {
    #[serde(flatten)]
    pub embedding: Embedding,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorSearchResponse {
    pub results: Vec<VectorSearchHit>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingsResponse {
    pub embeddings: Vec<Embedding>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<EmbeddingModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectModelRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectModelResponse {
    pub model_id: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/vectors/store
pub async fn store_vector(
    State(state): State<AppState>,
    Json(embedding): Json<Embedding>,
) -> ApiResult<impl IntoResponse> {
    if embedding.context_id.is_empty() {
        return Err(ApiError::missing_field("context_id"));
    }
    if embedding.model_id.is_empty() {
        return Err(ApiError::missing_field("model_id"));
    }
    state.embeddings.store(embedding.clone()).await?;
    Ok((StatusCode::CREATED, Json(embedding)))
}

/// POST /api/v1/vectors/search
pub async fn search_vectors(
    State(state): State<AppState>,
    Json(req): Json<VectorSearchRequest>,
) -> ApiResult<Json<VectorSearchResponse>> {
    if req.query_vector.is_empty() {
        return Err(ApiError::missing_field("query_vector"));
    }

    let results = state
        .embeddings
        .search(SearchQuery {
            vector: req.query_vector,
            context_id: req.context_id,
            model_id: req.model_id,
            limit: req.limit,
            similarity_threshold: req.similarity_threshold,
        })
        .await?;

    let results: Vec<VectorSearchHit> = results
        .into_iter()
        .map(|r| VectorSearchHit {
            embedding: r.embedding,
            similarity: r.similarity,
        })
        .collect();
    let count = results.len();
    Ok(Json(VectorSearchResponse { results, count }))
}

/// GET /api/v1/vectors/context/{id}
pub async fn get_context_vectors(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
) -> ApiResult<Json<EmbeddingsResponse>> {
    let embeddings = state.embeddings.get_by_context(&context_id).await?;
    let count = embeddings.len();
    Ok(Json(EmbeddingsResponse { embeddings, count }))
}

/// DELETE /api/v1/vectors/context/{id}
pub async fn delete_context_vectors(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    let deleted = state.embeddings.delete_by_context(&context_id).await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// GET /api/v1/vectors/context/{id}/model/{model_id}
pub async fn get_model_vectors(
    State(state): State<AppState>,
    Path((context_id, model_id)): Path<(String, String)>,
) -> ApiResult<Json<EmbeddingsResponse>> {
    let embeddings = state
        .embeddings
        .get_by_model(&context_id, &model_id)
        .await?;
    let count = embeddings.len();
    Ok(Json(EmbeddingsResponse { embeddings, count }))
}

/// DELETE /api/v1/vectors/context/{id}/model/{model_id}
pub async fn delete_model_vectors(
    State(state): State<AppState>,
    Path((context_id, model_id)): Path<(String, String)>,
) -> ApiResult<Json<DeletedResponse>> {
    let deleted = state
        .embeddings
        .delete_by_model(&context_id, &model_id)
        .await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// GET /api/v1/vectors/models
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.embeddings.list_supported_models(),
    })
}

/// POST /api/v1/vectors/models/select
pub async fn select_model(
    State(state): State<AppState>,
    Json(req): Json<SelectModelRequest>,
) -> ApiResult<Json<SelectModelResponse>> {
    if req.tenant_id.is_empty() {
        return Err(ApiError::missing_field("tenant_id"));
    }
    let config = state.tenants.get(&req.tenant_id).await?;
    let model_id = state
        .embeddings
        .select_model(
            &config,
            &ModelSelection {
                agent_id: req.agent_id,
                task_type: req.task_type,
                requested_model: req.model_id,
            },
        )
        .await?;
    Ok(Json(SelectModelResponse { model_id }))
}

/// PUT /api/v1/tenants/{id}/models
pub async fn put_tenant_models(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(mut config): Json<TenantEmbeddingConfig>,
) -> ApiResult<Json<TenantEmbeddingConfig>> {
    config.tenant_id = tenant_id;
    state.tenants.put(config.clone()).await?;
    Ok(Json(config))
}

/// GET /api/v1/tenants/{id}/models
pub async fn get_tenant_models(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<TenantEmbeddingConfig>> {
    Ok(Json(state.tenants.get(&tenant_id).await?))
}
