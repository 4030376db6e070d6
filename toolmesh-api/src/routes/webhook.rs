//! Webhook intake pipeline.
//!
//! Unauthenticated routes whose content is authenticated by a per-provider
//! HMAC secret. The pipeline is strictly ordered: content-type gate, bounded
//! read (10 MiB cap, 5 s read timeout), signature verification over the exact
//! bytes read, adapter dispatch, then optional correlation back to a context.
//! Nothing reaches an adapter before the signature checks out.

use crate::error::{ApiError, ApiResult};
use crate::signature::{verify, WebhookProvider};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use toolmesh_core::{Context, ContextItem, ItemRole};
use tracing::{debug, warn};

/// Webhook bodies are capped at 10 MiB.
pub const MAX_WEBHOOK_BYTES: usize = 10 * 1024 * 1024;

/// Reading the body may take at most 5 seconds, independent of any
/// client-provided cancellation.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Jitter slept before answering a signature mismatch.
const MISMATCH_JITTER_MS: std::ops::RangeInclusive<u64> = 50..=200;

/// Model id stamped on contexts created for correlated webhooks.
const WEBHOOK_MODEL_ID: &str = "system";

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /webhook/{provider}
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<WebhookAck>> {
    let provider = WebhookProvider::from_path(&provider)
        .ok_or_else(|| ApiError::not_found(format!("Unknown webhook provider '{provider}'")))?;
    intake(state, provider, query, headers, body).await
}

/// POST /webhook/agent
pub async fn agent_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<WebhookAck>> {
    intake(state, WebhookProvider::Agent, query, headers, body).await
}

async fn intake(
    state: AppState,
    provider: WebhookProvider,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<WebhookAck>> {
    let outcome = |o: &str| {
        state
            .metrics
            .webhook_deliveries
            .with_label_values(&[provider.name(), o])
            .inc();
    };

    // 1. Content-Type gate.
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    if !matches!(content_type, "application/json" | "application/json; charset=utf-8") {
        outcome("rejected");
        return Err(ApiError::validation(format!(
            "Unsupported Content-Type '{content_type}', expected application/json"
        )));
    }

    // 2. Bounded read: size cap and read timeout, both before any adapter
    //    work. The cap is also enforced against a declared Content-Length so
    //    oversized bodies fail without being read.
    if let Some(length) = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if length > MAX_WEBHOOK_BYTES {
            outcome("too_large");
            return Err(ApiError::payload_too_large(MAX_WEBHOOK_BYTES));
        }
    }
    let payload = match tokio::time::timeout(
        READ_TIMEOUT,
        axum::body::to_bytes(body, MAX_WEBHOOK_BYTES),
    )
    .await
    {
        Err(_) => {
            outcome("timeout");
            return Err(ApiError::timeout("webhook body read"));
        }
        Ok(Err(_)) => {
            // The limited reader only fails when the cap is crossed mid-body.
            outcome("too_large");
            return Err(ApiError::payload_too_large(MAX_WEBHOOK_BYTES));
        }
        Ok(Ok(bytes)) => bytes,
    };

    // 3. Secret must be configured for the provider.
    let Some(secret) = state.config.webhooks.secret_for(provider.name()) else {
        outcome("no_secret");
        return Err(ApiError::unauthorized(format!(
            "No webhook secret configured for provider '{}'",
            provider.name()
        )));
    };

    // 4. Constant-time signature verification over the exact bytes read.
    let Some(signature) = headers
        .get(provider.signature_header())
        .and_then(|h| h.to_str().ok())
    else {
        outcome("missing_signature");
        return Err(ApiError::signature_invalid(provider.name()));
    };
    if verify(provider, secret, &payload, signature).is_err() {
        // Randomized delay blunts timing and rate probing of the secret.
        let jitter = rand::rng().random_range(MISMATCH_JITTER_MS);
        tokio::time::sleep(Duration::from_millis(jitter)).await;
        outcome("invalid_signature");
        return Err(ApiError::signature_invalid(provider.name()));
    }

    // 5. Event type: provider header, then ?eventType=, then the default.
    let event_type = provider
        .event_header()
        .and_then(|name| headers.get(name))
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.get("eventType").cloned())
        .unwrap_or_else(|| provider.default_event_type().to_string());

    // Dispatch through the bridge: the adapter handles the event and any
    // contexts named in the payload metadata get a webhook item.
    state
        .bridge
        .handle_tool_webhook(provider.name(), &event_type, &payload)
        .await?;

    // 6. Correlation back to an agent's context, when an agent is resolvable.
    let context_id = match resolve_agent_id(provider, &query, &headers, &payload) {
        Some(agent_id) => {
            match correlate(&state, provider, &agent_id, &event_type, &payload).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        agent_id = %agent_id,
                        error = %e,
                        "webhook correlation failed"
                    );
                    None
                }
            }
        }
        None => None,
    };

    outcome("ok");
    debug!(provider = provider.name(), event_type = %event_type, "webhook accepted");
    Ok(Json(WebhookAck {
        status: "ok",
        context_id,
    }))
}

// ============================================================================
// CORRELATION
// ============================================================================

/// Resolve the agent an event belongs to: query parameter, `X-Agent-ID`
/// header, then a provider-specific fallback derived from the payload.
fn resolve_agent_id(
    provider: WebhookProvider,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    payload: &[u8],
) -> Option<String> {
    if let Some(agent_id) = query.get("agent_id").filter(|s| !s.is_empty()) {
        return Some(agent_id.clone());
    }
    if let Some(agent_id) = headers
        .get("x-agent-id")
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
    {
        return Some(agent_id.to_string());
    }
    provider_fallback_agent(provider, payload)
}

fn provider_fallback_agent(provider: WebhookProvider, payload: &[u8]) -> Option<String> {
    if provider != WebhookProvider::GitHub {
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    let full_name = value.get("repository")?.get("full_name")?.as_str()?;
    Some(format!("github-{full_name}"))
}

/// Append a webhook item to the agent's most recent context, creating one
/// when the agent has none.
async fn correlate(
    state: &AppState,
    provider: WebhookProvider,
    agent_id: &str,
    event_type: &str,
    payload: &[u8],
) -> Result<String, toolmesh_core::MeshError> {
    let existing = state
        .manager
        .list(
            agent_id,
            None,
            &toolmesh_core::ListOptions {
                limit: Some(1),
                ..Default::default()
            },
        )
        .await?;

    let context_id = match existing.into_iter().next() {
        Some(ctx) => ctx.id,
        None => {
            let ctx = state
                .manager
                .create(Context::new(agent_id, WEBHOOK_MODEL_ID))
                .await?;
            ctx.id
        }
    };

    let item = ContextItem::new(
        ItemRole::Webhook,
        String::from_utf8_lossy(payload).into_owned(),
        0,
    )
    .with_metadata("tool", serde_json::json!(provider.name()))
    .with_metadata("event_type", serde_json::json!(event_type));
    state.manager.append_items(&context_id, vec![item]).await?;
    Ok(context_id)
}
