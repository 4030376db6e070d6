//! Toolmesh Context - Agent Conversation Transcripts
//!
//! The context is the central entity of the server: an append-structured,
//! token-budgeted transcript owned by an agent. Items are kept in insertion
//! order, which is also chronological order; `current_tokens` is always the
//! sum of item tokens.

use crate::{MeshResult, ValidationError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// ITEM ROLES
// ============================================================================

/// Role of a context item.
///
/// The enumerated values carry truncation semantics; any other string is
/// tolerated and round-trips through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemRole {
    System,
    User,
    Assistant,
    ToolRequest,
    ToolResponse,
    ToolError,
    ToolQuery,
    ToolData,
    Webhook,
    /// Free-form role with no special truncation semantics.
    Other(String),
}

impl ItemRole {
    /// Wire representation of the role.
    pub fn as_str(&self) -> &str {
        match self {
            ItemRole::System => "system",
            ItemRole::User => "user",
            ItemRole::Assistant => "assistant",
            ItemRole::ToolRequest => "tool_request",
            ItemRole::ToolResponse => "tool_response",
            ItemRole::ToolError => "tool_error",
            ItemRole::ToolQuery => "tool_query",
            ItemRole::ToolData => "tool_data",
            ItemRole::Webhook => "webhook",
            ItemRole::Other(s) => s,
        }
    }

    /// Roles kept unconditionally by the user-preserving truncation strategy.
    pub fn is_preserved(&self) -> bool {
        matches!(self, ItemRole::System | ItemRole::User)
    }
}

impl From<String> for ItemRole {
    fn from(s: String) -> Self {
        match s.as_str() {
            "system" => ItemRole::System,
            "user" => ItemRole::User,
            "assistant" => ItemRole::Assistant,
            "tool_request" => ItemRole::ToolRequest,
            "tool_response" => ItemRole::ToolResponse,
            "tool_error" => ItemRole::ToolError,
            "tool_query" => ItemRole::ToolQuery,
            "tool_data" => ItemRole::ToolData,
            "webhook" => ItemRole::Webhook,
            _ => ItemRole::Other(s),
        }
    }
}

impl From<ItemRole> for String {
    fn from(role: ItemRole) -> Self {
        role.as_str().to_string()
    }
}

impl std::fmt::Display for ItemRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CONTEXT ITEM
// ============================================================================

/// One appended record of a context: a conversation turn, a tool call, a tool
/// reply, or an inbound webhook.
///
/// `tokens` is authoritative. The core never computes token counts; callers
/// supply them and the context sums them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub role: ItemRole,
    pub content: String,
    /// Token count of this item as reported by the caller.
    #[serde(default)]
    pub tokens: u32,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata attached to the item.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ContextItem {
    /// Create an item stamped with the current time.
    pub fn new(role: ItemRole, content: impl Into<String>, tokens: u32) -> Self {
        Self {
            role,
            content: content.into(),
            tokens,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

/// Default cache TTL applied when a context carries no expiry.
pub const DEFAULT_CACHE_TTL_SECS: i64 = 3600;

/// An agent's conversation transcript plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Opaque identifier, UUID-shaped. Generated by the core when empty.
    #[serde(default)]
    pub id: String,
    /// Owning agent. Required and non-empty at creation.
    #[serde(default)]
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Model this context is bound to. Required at creation; drives
    /// embedding model selection.
    #[serde(default)]
    pub model_id: String,
    /// Ordered items. Insertion order is chronological order.
    #[serde(default)]
    pub content: Vec<ContextItem>,
    /// Sum of item tokens. Maintained by mutation paths, never trusted from
    /// the wire.
    #[serde(default)]
    pub current_tokens: u32,
    /// Token budget. Zero disables truncation.
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Stamped by the manager on create; tolerated absent on the wire.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Context {
    /// Create an empty context for an agent/model pair, stamped now.
    pub fn new(agent_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            agent_id: agent_id.into(),
            session_id: None,
            model_id: model_id.into(),
            content: Vec::new(),
            current_tokens: 0,
            max_tokens: 0,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    /// Set the token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Validate creation invariants: `agent_id` and `model_id` non-empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.agent_id.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "agent_id".to_string(),
            });
        }
        if self.model_id.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "model_id".to_string(),
            });
        }
        Ok(())
    }

    /// Append an item, maintaining the token sum.
    pub fn append_item(&mut self, item: ContextItem) {
        self.current_tokens = self.current_tokens.saturating_add(item.tokens);
        self.content.push(item);
    }

    /// Sum of item tokens. Equals `current_tokens` whenever the context was
    /// mutated only through context-manager paths.
    pub fn token_sum(&self) -> u32 {
        self.content.iter().map(|i| i.tokens).sum()
    }

    /// Recompute `current_tokens` from the items.
    pub fn recount_tokens(&mut self) {
        self.current_tokens = self.token_sum();
    }

    /// True when the context carries a budget and currently exceeds it.
    pub fn over_budget(&self) -> bool {
        self.max_tokens > 0 && self.current_tokens > self.max_tokens
    }

    /// Cache TTL for this context: `expires_at - now` when set and in the
    /// future, otherwise the one-hour default.
    pub fn cache_ttl(&self, now: DateTime<Utc>) -> Duration {
        match self.expires_at {
            Some(expires) if expires > now => expires - now,
            _ => Duration::seconds(DEFAULT_CACHE_TTL_SECS),
        }
    }

    /// Case-insensitive substring search over item content, preserving the
    /// original order. An empty query matches nothing.
    pub fn search_items(&self, query: &str) -> Vec<&ContextItem> {
        if query.is_empty() {
            return Vec::new();
        }
        let needle = query.to_lowercase();
        self.content
            .iter()
            .filter(|item| item.content.to_lowercase().contains(&needle))
            .collect()
    }
}

// ============================================================================
// UPDATE OPTIONS AND PATCHES
// ============================================================================

/// Wire-level truncation strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationKind {
    #[default]
    OldestFirst,
    PreserveUser,
    RelevanceBased,
    Compression,
}

impl TruncationKind {
    /// Wire name of the strategy, also used as a metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            TruncationKind::OldestFirst => "oldest_first",
            TruncationKind::PreserveUser => "preserve_user",
            TruncationKind::RelevanceBased => "relevance_based",
            TruncationKind::Compression => "compression",
        }
    }
}

/// Options controlling an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Replace the item list instead of appending.
    #[serde(default)]
    pub replace_content: bool,
    /// Run the configured truncation strategy when over budget.
    #[serde(default)]
    pub truncate: bool,
    /// Strategy selector; `oldest_first` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_strategy: Option<TruncationKind>,
}

impl UpdateOptions {
    /// Options requesting truncation with the given strategy.
    pub fn truncating(kind: TruncationKind) -> Self {
        Self {
            replace_content: false,
            truncate: true,
            truncate_strategy: Some(kind),
        }
    }
}

/// Partial update applied by the context manager.
///
/// Scalar fields merge when present and non-empty; metadata merges key-wise;
/// content appends (or replaces under `UpdateOptions::replace_content`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContextItem>,
}

impl ContextPatch {
    /// A patch that only appends items.
    pub fn items(content: Vec<ContextItem>) -> Self {
        Self {
            content,
            ..Default::default()
        }
    }
}

impl From<Context> for ContextPatch {
    /// Treat a full context body as a patch: non-empty scalars merge,
    /// metadata merges, items append.
    fn from(ctx: Context) -> Self {
        Self {
            agent_id: Some(ctx.agent_id).filter(|s| !s.is_empty()),
            session_id: ctx.session_id.filter(|s| !s.is_empty()),
            model_id: Some(ctx.model_id).filter(|s| !s.is_empty()),
            max_tokens: (ctx.max_tokens > 0).then_some(ctx.max_tokens),
            expires_at: ctx.expires_at,
            metadata: ctx.metadata,
            content: ctx.content,
        }
    }
}

/// Filters for listing an agent's contexts. Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
}

// ============================================================================
// TESTS
// ============================================================================
