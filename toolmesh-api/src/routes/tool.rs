//! Tool routes: execute actions and queries through the bridge.
//!
//! Every call is recorded into the named context by the bridge before and
//! after the adapter runs; these handlers never touch adapters directly
//! except for discovery.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallQuery {
    pub context_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionsResponse {
    pub tool: String,
    pub actions: Vec<String>,
}

fn require_context_id(query: &ToolCallQuery) -> ApiResult<&str> {
    query
        .context_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field("context_id"))
}

/// POST /api/v1/tools/{tool}/actions/{action}?context_id=...
pub async fn execute_action(
    State(state): State<AppState>,
    Path((tool, action)): Path<(String, String)>,
    Query(query): Query<ToolCallQuery>,
    Json(params): Json<Value>,
) -> ApiResult<Json<Value>> {
    let context_id = require_context_id(&query)?;
    let result = state
        .bridge
        .execute_tool_action(context_id, &tool, &action, params)
        .await?;
    Ok(Json(result))
}

/// POST /api/v1/tools/{tool}/query?context_id=...
pub async fn query_tool(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    Query(query): Query<ToolCallQuery>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let context_id = require_context_id(&query)?;
    let result = state.bridge.get_tool_data(context_id, &tool, body).await?;
    Ok(Json(result))
}

/// GET /api/v1/tools
pub async fn list_tools(State(state): State<AppState>) -> Json<ToolsResponse> {
    Json(ToolsResponse {
        tools: state.registry.names().await,
    })
}

/// GET /api/v1/tools/{tool}/actions
pub async fn list_actions(
    State(state): State<AppState>,
    Path(tool): Path<String>,
) -> ApiResult<Json<ActionsResponse>> {
    let adapter = state.registry.get(&tool).await?;
    Ok(Json(ActionsResponse {
        tool,
        actions: adapter.actions(),
    }))
}
