//! Tool adapter contract.
//!
//! An adapter talks to one external DevOps tool. Payloads cross this boundary
//! as opaque JSON; each adapter parses them into its own typed variants and
//! never leaks untyped values into core types.

use async_trait::async_trait;
use serde_json::Value;
use toolmesh_core::{HealthCheck, MeshResult};

/// A plug-in that talks to one external tool.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Registry name, e.g. `github`.
    fn name(&self) -> &str;

    /// Actions this adapter can execute, for discovery. Adapters with
    /// dynamic action sets may return an empty list.
    fn actions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute a named action. Params and result are opaque JSON.
    async fn execute_action(&self, action: &str, params: &Value) -> MeshResult<Value>;

    /// Run a read-only query against the tool.
    async fn query(&self, query: &Value) -> MeshResult<Value>;

    /// Handle an inbound webhook already verified by the intake pipeline.
    async fn handle_webhook(&self, event_type: &str, payload: &[u8]) -> MeshResult<()>;

    /// Current health of the adapter's connection to its tool.
    async fn health(&self) -> HealthCheck;

    /// Release connections and background work.
    async fn shutdown(&self) -> MeshResult<()> {
        Ok(())
    }
}
