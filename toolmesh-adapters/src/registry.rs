//! Adapter registry: name lookup, health rollup, shutdown fan-out.

use crate::ToolAdapter;
use std::sync::Arc;
use tokio::sync::RwLock;
use toolmesh_core::{AdapterError, HealthReport, MeshResult};
use tracing::{info, warn};

/// Registry of tool adapters. Registration order is kept so shutdown can fan
/// out in reverse.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<Vec<Arc<dyn ToolAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. A same-named adapter is replaced in place.
    pub async fn register(&self, adapter: Arc<dyn ToolAdapter>) {
        let mut adapters = self.adapters.write().await;
        let name = adapter.name().to_string();
        match adapters.iter_mut().find(|a| a.name() == name) {
            Some(slot) => *slot = adapter,
            None => adapters.push(adapter),
        }
        info!(tool = %name, "adapter registered");
    }

    /// Look up an adapter by name.
    pub async fn get(&self, name: &str) -> MeshResult<Arc<dyn ToolAdapter>> {
        self.adapters
            .read()
            .await
            .iter()
            .find(|a| a.name() == name)
            .cloned()
            .ok_or_else(|| {
                AdapterError::NotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Registered adapter names, in registration order.
    pub async fn names(&self) -> Vec<String> {
        self.adapters
            .read()
            .await
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    /// Roll up the health of every adapter. Overall status is the worst
    /// component status.
    pub async fn health(&self) -> HealthReport {
        let adapters: Vec<Arc<dyn ToolAdapter>> =
            self.adapters.read().await.iter().cloned().collect();
        let mut checks = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            checks.push(adapter.health().await);
        }
        HealthReport::rollup(checks)
    }

    /// Shut adapters down in reverse registration order. Failures are logged
    /// and do not stop the fan-out.
    pub async fn shutdown(&self) {
        let adapters: Vec<Arc<dyn ToolAdapter>> =
            self.adapters.write().await.drain(..).collect();
        for adapter in adapters.into_iter().rev() {
            if let Err(e) = adapter.shutdown().await {
                warn!(tool = %adapter.name(), error = %e, "adapter shutdown failed");
            }
        }
    }
}
