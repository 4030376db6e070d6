//! Toolmesh Test Utilities
//!
//! Centralized test infrastructure for the workspace:
//! - An in-memory service stack wired the way production wires it
//! - A scriptable mock adapter
//! - Fixture builders for contexts and items
//! - Proptest generators for items

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use toolmesh_adapters::{AdapterRegistry, ContextBridge, ToolAdapter};
use toolmesh_context::ContextManager;
use toolmesh_core::{
    AdapterError, Context, ContextItem, HealthCheck, ItemRole, MeshResult,
};
use toolmesh_events::EventBus;
use toolmesh_storage::{
    ContextRepository, InMemoryBlobStore, InMemoryCache, InMemoryEmbeddingStore,
    InMemoryIndexStore,
};

// ============================================================================
// SERVICE STACK
// ============================================================================

/// A fully wired in-memory service stack for tests.
pub struct TestStack {
    pub cache: Arc<InMemoryCache>,
    pub embeddings: Arc<InMemoryEmbeddingStore>,
    pub bus: Arc<EventBus>,
    pub manager: Arc<ContextManager>,
    pub registry: Arc<AdapterRegistry>,
    pub bridge: Arc<ContextBridge>,
}

impl TestStack {
    /// Build a stack over fresh in-memory stores.
    pub fn new() -> Self {
        let cache = Arc::new(InMemoryCache::new());
        let embeddings = Arc::new(InMemoryEmbeddingStore::new());
        let bus = Arc::new(EventBus::default());
        let repository = Arc::new(ContextRepository::new(
            cache.clone(),
            Arc::new(InMemoryIndexStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        ));
        let manager = Arc::new(ContextManager::new(
            repository,
            embeddings.clone(),
            bus.clone(),
        ));
        let registry = Arc::new(AdapterRegistry::new());
        let bridge = Arc::new(ContextBridge::new(manager.clone(), registry.clone()));
        Self {
            cache,
            embeddings,
            bus,
            manager,
            registry,
            bridge,
        }
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MOCK ADAPTER
// ============================================================================

/// Scriptable adapter: returns a fixed result or a scripted failure, and
/// counts invocations.
pub struct MockAdapter {
    name: String,
    result: Value,
    fail_with: Option<String>,
    pub action_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub webhook_calls: AtomicUsize,
}

impl MockAdapter {
    pub fn succeeding(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            result: json!({ "ok": true }),
            fail_with: None,
            action_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            webhook_calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: impl Into<String>, reason: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            result: Value::Null,
            fail_with: Some(reason.into()),
            action_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            webhook_calls: AtomicUsize::new(0),
        })
    }

    pub fn with_result(name: impl Into<String>, result: Value) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            result,
            fail_with: None,
            action_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            webhook_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ToolAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_action(&self, action: &str, _params: &Value) -> MeshResult<Value> {
        self.action_calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(reason) => Err(AdapterError::ExecutionFailed {
                tool: self.name.clone(),
                action: action.to_string(),
                reason: reason.clone(),
            }
            .into()),
            None => Ok(self.result.clone()),
        }
    }

    async fn query(&self, _query: &Value) -> MeshResult<Value> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(reason) => Err(AdapterError::QueryFailed {
                tool: self.name.clone(),
                reason: reason.clone(),
            }
            .into()),
            None => Ok(self.result.clone()),
        }
    }

    async fn handle_webhook(&self, _event_type: &str, _payload: &[u8]) -> MeshResult<()> {
        self.webhook_calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(reason) => Err(AdapterError::WebhookFailed {
                tool: self.name.clone(),
                reason: reason.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }

    async fn health(&self) -> HealthCheck {
        match &self.fail_with {
            Some(reason) => HealthCheck::unhealthy(self.name.clone(), reason.clone()),
            None => HealthCheck::healthy(self.name.clone()),
        }
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A context with a budget and a transcript of `(role, tokens)` items.
pub fn context_with_items(max_tokens: u32, items: &[(ItemRole, u32)]) -> Context {
    let mut ctx = Context::new("test-agent", "test-model").with_max_tokens(max_tokens);
    for (i, (role, tokens)) in items.iter().enumerate() {
        ctx.append_item(ContextItem::new(
            role.clone(),
            format!("item {i}"),
            *tokens,
        ));
    }
    ctx
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Generators for property tests.
pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_role() -> impl Strategy<Value = ItemRole> {
        prop_oneof![
            Just(ItemRole::System),
            Just(ItemRole::User),
            Just(ItemRole::Assistant),
            Just(ItemRole::ToolRequest),
            Just(ItemRole::ToolResponse),
            Just(ItemRole::ToolError),
            Just(ItemRole::Webhook),
        ]
    }

    pub fn arb_item() -> impl Strategy<Value = ContextItem> {
        (arb_role(), ".{0,40}", 0u32..200)
            .prop_map(|(role, content, tokens)| ContextItem::new(role, content, tokens))
    }

    pub fn arb_items(max: usize) -> impl Strategy<Value = Vec<ContextItem>> {
        prop::collection::vec(arb_item(), 0..max)
    }
}
