//! Adapter-context bridge.
//!
//! Every external effect performed on behalf of an agent is reflected as an
//! item in its context: a `tool_request` before the adapter runs, then a
//! `tool_response` or `tool_error` after. The request item must be durable
//! before the adapter call starts; recording failures after the call are
//! logged and never mask the primary result. The bridge mutates contexts only
//! through the context manager.

use crate::AdapterRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use toolmesh_context::ContextManager;
use toolmesh_core::{ContextItem, ItemRole, MeshResult};
use tracing::{error, warn};

/// Records tool activity into the owning context around adapter calls.
pub struct ContextBridge {
    manager: Arc<ContextManager>,
    registry: Arc<AdapterRegistry>,
}

impl ContextBridge {
    pub fn new(manager: Arc<ContextManager>, registry: Arc<AdapterRegistry>) -> Self {
        Self { manager, registry }
    }

    /// Execute a tool action, recording `tool_request` then `tool_response`
    /// or `tool_error` in the context.
    pub async fn execute_tool_action(
        &self,
        context_id: &str,
        tool: &str,
        action: &str,
        params: Value,
    ) -> MeshResult<Value> {
        let adapter = self.registry.get(tool).await?;

        let request = ContextItem::new(
            ItemRole::ToolRequest,
            json!({ "tool": tool, "action": action, "params": &params }).to_string(),
            0,
        )
        .with_metadata("tool", json!(tool))
        .with_metadata("action", json!(action));
        // The adapter call must not start until the request item is durable.
        self.manager.append_items(context_id, vec![request]).await?;

        match adapter.execute_action(action, &params).await {
            Ok(result) => {
                let response = ContextItem::new(
                    ItemRole::ToolResponse,
                    result.to_string(),
                    0,
                )
                .with_metadata("tool", json!(tool))
                .with_metadata("action", json!(action));
                if let Err(e) = self.manager.append_items(context_id, vec![response]).await {
                    error!(context_id, tool, action, error = %e, "failed to record tool response");
                }
                Ok(result)
            }
            Err(err) => {
                let failure = ContextItem::new(ItemRole::ToolError, err.to_string(), 0)
                    .with_metadata("tool", json!(tool))
                    .with_metadata("action", json!(action));
                if let Err(e) = self.manager.append_items(context_id, vec![failure]).await {
                    error!(context_id, tool, action, error = %e, "failed to record tool error");
                }
                Err(err)
            }
        }
    }

    /// Query a tool, recording `tool_query` then `tool_data` or `tool_error`.
    pub async fn get_tool_data(
        &self,
        context_id: &str,
        tool: &str,
        query: Value,
    ) -> MeshResult<Value> {
        let adapter = self.registry.get(tool).await?;

        let request = ContextItem::new(
            ItemRole::ToolQuery,
            json!({ "tool": tool, "query": &query }).to_string(),
            0,
        )
        .with_metadata("tool", json!(tool));
        self.manager.append_items(context_id, vec![request]).await?;

        match adapter.query(&query).await {
            Ok(result) => {
                let data = ContextItem::new(ItemRole::ToolData, result.to_string(), 0)
                    .with_metadata("tool", json!(tool));
                if let Err(e) = self.manager.append_items(context_id, vec![data]).await {
                    error!(context_id, tool, error = %e, "failed to record tool data");
                }
                Ok(result)
            }
            Err(err) => {
                let failure = ContextItem::new(ItemRole::ToolError, err.to_string(), 0)
                    .with_metadata("tool", json!(tool));
                if let Err(e) = self.manager.append_items(context_id, vec![failure]).await {
                    error!(context_id, tool, error = %e, "failed to record tool error");
                }
                Err(err)
            }
        }
    }

    /// Dispatch a verified webhook to its adapter, then append a `webhook`
    /// item to every context named in `metadata.context_ids`. Returns the
    /// ids that were recorded.
    pub async fn handle_tool_webhook(
        &self,
        tool: &str,
        event_type: &str,
        payload: &[u8],
    ) -> MeshResult<Vec<String>> {
        let adapter = self.registry.get(tool).await?;

        let context_ids = extract_context_ids(payload);
        adapter.handle_webhook(event_type, payload).await?;

        let content = String::from_utf8_lossy(payload).into_owned();
        let mut recorded = Vec::with_capacity(context_ids.len());
        for context_id in context_ids {
            let item = ContextItem::new(ItemRole::Webhook, content.clone(), 0)
                .with_metadata("tool", json!(tool))
                .with_metadata("event_type", json!(event_type));
            match self.manager.append_items(&context_id, vec![item]).await {
                Ok(_) => recorded.push(context_id),
                Err(e) => {
                    warn!(context_id = %context_id, tool, event_type, error = %e, "failed to record webhook item");
                }
            }
        }
        Ok(recorded)
    }
}

/// Pull `metadata.context_ids[]` out of a webhook payload. Absent fields,
/// non-string entries, and unparsable payloads all yield an empty list.
fn extract_context_ids(payload: &[u8]) -> Vec<String> {
    let Ok(value) = serde_json::from_slice::<Value>(payload) else {
        return Vec::new();
    };
    value
        .get("metadata")
        .and_then(|m| m.get("context_ids"))
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolAdapter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use toolmesh_core::{AdapterError, Context, HealthCheck, MeshError};
    use toolmesh_events::EventBus;
    use toolmesh_storage::{
        ContextRepository, InMemoryBlobStore, InMemoryCache, InMemoryEmbeddingStore,
        InMemoryIndexStore,
    };

    struct MockAdapter {
        fail: bool,
        calls: AtomicUsize,
        webhooks: AtomicUsize,
    }

    impl MockAdapter {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                calls: AtomicUsize::new(0),
                webhooks: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ToolAdapter for MockAdapter {
        fn name(&self) -> &str {
            "mock"
        }

        async fn execute_action(&self, action: &str, _params: &Value) -> MeshResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AdapterError::ExecutionFailed {
                    tool: "mock".to_string(),
                    action: action.to_string(),
                    reason: "boom".to_string(),
                }
                .into());
            }
            Ok(json!({ "ok": true }))
        }

        async fn query(&self, _query: &Value) -> MeshResult<Value> {
            if self.fail {
                return Err(AdapterError::QueryFailed {
                    tool: "mock".to_string(),
                    reason: "boom".to_string(),
                }
                .into());
            }
            Ok(json!({ "rows": [1, 2, 3] }))
        }

        async fn handle_webhook(&self, _event_type: &str, _payload: &[u8]) -> MeshResult<()> {
            self.webhooks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn health(&self) -> HealthCheck {
            HealthCheck::healthy("mock")
        }
    }

    async fn bridge_with(adapter: Arc<MockAdapter>) -> (ContextBridge, Arc<ContextManager>) {
        let repository = Arc::new(ContextRepository::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryIndexStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        ));
        let manager = Arc::new(ContextManager::new(
            repository,
            Arc::new(InMemoryEmbeddingStore::new()),
            Arc::new(EventBus::default()),
        ));
        let registry = Arc::new(AdapterRegistry::new());
        registry.register(adapter).await;
        (ContextBridge::new(manager.clone(), registry), manager)
    }

    #[tokio::test]
    async fn test_action_records_request_then_response() {
        let adapter = MockAdapter::new(false);
        let (bridge, manager) = bridge_with(adapter.clone()).await;
        let ctx = manager.create(Context::new("a1", "m1")).await.unwrap();

        let result = bridge
            .execute_tool_action(&ctx.id, "mock", "create_issue", json!({ "title": "t" }))
            .await
            .unwrap();
        assert_eq!(result, json!({ "ok": true }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

        let items = manager.get_items(&ctx.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].role, ItemRole::ToolRequest);
        assert_eq!(items[1].role, ItemRole::ToolResponse);
        assert!(items[0].content.contains("create_issue"));
        assert_eq!(items[1].content, json!({ "ok": true }).to_string());
    }

    #[tokio::test]
    async fn test_action_failure_records_tool_error_and_surfaces_it() {
        let adapter = MockAdapter::new(true);
        let (bridge, manager) = bridge_with(adapter).await;
        let ctx = manager.create(Context::new("a1", "m1")).await.unwrap();

        let err = bridge
            .execute_tool_action(&ctx.id, "mock", "create_issue", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Adapter(_)));

        let items = manager.get_items(&ctx.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].role, ItemRole::ToolRequest);
        assert_eq!(items[1].role, ItemRole::ToolError);
        assert!(items[1].content.contains("boom"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found_and_records_nothing() {
        let adapter = MockAdapter::new(false);
        let (bridge, manager) = bridge_with(adapter).await;
        let ctx = manager.create(Context::new("a1", "m1")).await.unwrap();

        let err = bridge
            .execute_tool_action(&ctx.id, "missing", "x", json!({}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(manager.get_items(&ctx.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_context_aborts_before_adapter_call() {
        let adapter = MockAdapter::new(false);
        let (bridge, _manager) = bridge_with(adapter.clone()).await;

        let err = bridge
            .execute_tool_action("missing-ctx", "mock", "x", json!({}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        // The request item could not be made durable, so the adapter never ran.
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_query_records_tool_query_then_tool_data() {
        let adapter = MockAdapter::new(false);
        let (bridge, manager) = bridge_with(adapter).await;
        let ctx = manager.create(Context::new("a1", "m1")).await.unwrap();

        let data = bridge
            .get_tool_data(&ctx.id, "mock", json!({ "q": "builds" }))
            .await
            .unwrap();
        assert_eq!(data, json!({ "rows": [1, 2, 3] }));

        let items = manager.get_items(&ctx.id).await.unwrap();
        let roles: Vec<&ItemRole> = items.iter().map(|i| &i.role).collect();
        assert_eq!(roles, vec![&ItemRole::ToolQuery, &ItemRole::ToolData]);
    }

    #[tokio::test]
    async fn test_webhook_correlates_to_named_contexts() {
        let adapter = MockAdapter::new(false);
        let (bridge, manager) = bridge_with(adapter.clone()).await;
        let a = manager.create(Context::new("a1", "m1")).await.unwrap();
        let b = manager.create(Context::new("a2", "m1")).await.unwrap();

        let payload = json!({
            "event": "push",
            "metadata": { "context_ids": [a.id, b.id, "ghost"] }
        })
        .to_string();

        let recorded = bridge
            .handle_tool_webhook("mock", "push", payload.as_bytes())
            .await
            .unwrap();
        assert_eq!(adapter.webhooks.load(Ordering::SeqCst), 1);
        // The ghost id fails to record but does not fail the webhook.
        assert_eq!(recorded.len(), 2);

        for id in [&a.id, &b.id] {
            let items = manager.get_items(id).await.unwrap();
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].role, ItemRole::Webhook);
            assert_eq!(items[0].metadata["event_type"], json!("push"));
            assert_eq!(items[0].content, payload);
        }
    }

    #[tokio::test]
    async fn test_webhook_without_context_ids_still_dispatches() {
        let adapter = MockAdapter::new(false);
        let (bridge, _manager) = bridge_with(adapter.clone()).await;

        let recorded = bridge
            .handle_tool_webhook("mock", "push", br#"{"event":"push"}"#)
            .await
            .unwrap();
        assert!(recorded.is_empty());
        assert_eq!(adapter.webhooks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_extract_context_ids_lenient() {
        assert!(extract_context_ids(b"not json").is_empty());
        assert!(extract_context_ids(br#"{"metadata":{}}"#).is_empty());
        assert_eq!(
            extract_context_ids(br#"{"metadata":{"context_ids":["x",1,"y"]}}"#),
            vec!["x".to_string(), "y".to_string()]
        );
    }
}
