//! Context REST routes.
//!
//! CRUD plus the item, search, and summary sub-resources. Create responds
//! with HATEOAS links so agents can discover the sub-resources without
//! hard-coding paths.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use toolmesh_core::{Context, ContextItem, ContextPatch, ListOptions, UpdateOptions};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// Context plus discovery links, returned from create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResponse {
    #[serde(flatten)]
    pub context: Context,
    #[serde(rename = "_links")]
    pub links: HashMap<String, String>,
}

impl ContextResponse {
    fn new(context: Context) -> Self {
        let id = &context.id;
        let links = HashMap::from([
            ("self".to_string(), format!("/api/v1/contexts/{id}")),
            ("items".to_string(), format!("/api/v1/contexts/{id}/items")),
            ("search".to_string(), format!("/api/v1/contexts/{id}/search")),
            ("summary".to_string(), format!("/api/v1/contexts/{id}/summary")),
            ("collection".to_string(), "/api/v1/contexts".to_string()),
        ]);
        Self { context, links }
    }
}

/// Full update wrapper: the context body to merge plus options.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateContextRequest {
    pub context: Context,
    #[serde(default)]
    pub options: UpdateOptions,
}

/// Partial update: metadata merges, content appends (or replaces per
/// options).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchContextRequest {
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub content: Vec<ContextItem>,
    #[serde(default)]
    pub options: UpdateOptions,
}

/// Query string for listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListContextsQuery {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListContextsResponse {
    pub contexts: Vec<Context>,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ContextItem>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResponse {
    pub context_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemsResponse {
    pub items: Vec<ContextItem>,
    pub count: usize,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/contexts
pub async fn create_context(
    State(state): State<AppState>,
    Json(ctx): Json<Context>,
) -> ApiResult<impl IntoResponse> {
    let created = state.manager.create(ctx).await?;
    state
        .metrics
        .context_operations
        .with_label_values(&["create"])
        .inc();
    Ok((StatusCode::CREATED, Json(ContextResponse::new(created))))
}

/// GET /api/v1/contexts/{id}
pub async fn get_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Context>> {
    Ok(Json(state.manager.get(&id).await?))
}

/// PUT /api/v1/contexts/{id}
pub async fn update_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateContextRequest>,
) -> ApiResult<Json<Context>> {
    let updated = state
        .manager
        .update(&id, ContextPatch::from(req.context), &req.options)
        .await?;
    state
        .metrics
        .context_operations
        .with_label_values(&["update"])
        .inc();
    Ok(Json(updated))
}

/// PATCH /api/v1/contexts/{id}
pub async fn patch_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PatchContextRequest>,
) -> ApiResult<Json<Context>> {
    let patch = ContextPatch {
        metadata: req.metadata,
        content: req.content,
        ..Default::default()
    };
    let updated = state.manager.update(&id, patch, &req.options).await?;
    state
        .metrics
        .context_operations
        .with_label_values(&["patch"])
        .inc();
    Ok(Json(updated))
}

/// DELETE /api/v1/contexts/{id}
pub async fn delete_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.delete(&id).await?;
    state
        .metrics
        .context_operations
        .with_label_values(&["delete"])
        .inc();
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/contexts?agent_id=...
pub async fn list_contexts(
    State(state): State<AppState>,
    Query(query): Query<ListContextsQuery>,
) -> ApiResult<Json<ListContextsResponse>> {
    let agent_id = query
        .agent_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field("agent_id"))?;

    let options = ListOptions {
        limit: query.limit,
        offset: query.offset,
        created_after: query.created_after,
        created_before: query.created_before,
    };
    let contexts = state
        .manager
        .list(agent_id, query.session_id.as_deref(), &options)
        .await?;
    let count = contexts.len();
    Ok(Json(ListContextsResponse { contexts, count }))
}

/// GET /api/v1/contexts/{id}/items
pub async fn get_items(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ItemsResponse>> {
    let items = state.manager.get_items(&id).await?;
    let count = items.len();
    Ok(Json(ItemsResponse { items, count }))
}

/// POST /api/v1/contexts/{id}/items
pub async fn append_items(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(items): Json<Vec<ContextItem>>,
) -> ApiResult<Json<Context>> {
    if items.is_empty() {
        return Err(ApiError::validation("At least one item is required"));
    }
    Ok(Json(state.manager.append_items(&id, items).await?))
}

/// POST /api/v1/contexts/{id}/search
pub async fn search_in_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let results = state.manager.search_in_context(&id, &req.query).await?;
    let count = results.len();
    Ok(Json(SearchResponse { results, count }))
}

/// GET /api/v1/contexts/{id}/summary
pub async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SummaryResponse>> {
    let summary = state.manager.summarize(&id).await?;
    Ok(Json(SummaryResponse {
        context_id: id,
        summary,
    }))
}
