//! Relational index of context references.
//!
//! The index is the source of truth for listing: it persists lightweight
//! references (and the item rows of each context for relational queries),
//! never the full body. The blob store owns the body.

mod memory;
mod postgres;

pub use memory::InMemoryIndexStore;
pub use postgres::{PgIndexStore, PgIndexConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use toolmesh_core::{Context, ContextItem, ListOptions, MeshResult};

/// Lightweight reference to a context, as persisted in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRef {
    pub id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub model_id: String,
    pub current_tokens: u32,
    pub max_tokens: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Context> for ContextRef {
    fn from(ctx: &Context) -> Self {
        Self {
            id: ctx.id.clone(),
            agent_id: ctx.agent_id.clone(),
            session_id: ctx.session_id.clone(),
            model_id: ctx.model_id.clone(),
            current_tokens: ctx.current_tokens,
            max_tokens: ctx.max_tokens,
            created_at: ctx.created_at,
            updated_at: ctx.updated_at,
            expires_at: ctx.expires_at,
        }
    }
}

/// Index store trait.
///
/// `upsert_ref` replaces an existing reference for the same id, together with
/// the item rows belonging to the context. Listings apply the filters of
/// `ListOptions` (time bounds inclusive) and order by creation time, newest
/// first, before pagination.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or replace the reference and item rows for a context.
    async fn upsert(&self, ctx: &Context) -> MeshResult<()>;

    /// Fetch a reference by id. `NotFound` when absent.
    async fn get_ref(&self, context_id: &str) -> MeshResult<ContextRef>;

    /// Delete a reference and its item rows. Absent ids are `NotFound`.
    async fn delete(&self, context_id: &str) -> MeshResult<()>;

    /// List references for an agent, optionally scoped to a session.
    async fn list(
        &self,
        agent_id: &str,
        session_id: Option<&str>,
        options: &ListOptions,
    ) -> MeshResult<Vec<ContextRef>>;

    /// Item rows for a context, in insertion order.
    async fn items(&self, context_id: &str) -> MeshResult<Vec<ContextItem>>;
}

/// Apply list filters, ordering, and pagination uniformly across backends
/// that filter in process.
pub(crate) fn apply_list_options(
    mut refs: Vec<ContextRef>,
    options: &ListOptions,
) -> Vec<ContextRef> {
    if let Some(after) = options.created_after {
        refs.retain(|r| r.created_at >= after);
    }
    if let Some(before) = options.created_before {
        refs.retain(|r| r.created_at <= before);
    }
    refs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let offset = options.offset.unwrap_or(0);
    if offset >= refs.len() {
        return Vec::new();
    }
    let refs = refs.split_off(offset);
    match options.limit {
        Some(limit) => refs.into_iter().take(limit).collect(),
        None => refs,
    }
}
