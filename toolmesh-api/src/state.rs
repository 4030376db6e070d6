//! Shared application state.
//!
//! All long-lived components live in one `CoreServices` handle constructed at
//! startup and passed explicitly; there is no global mutable state. Teardown
//! is explicit: `shutdown` stops spawned tasks first, then closes components
//! in reverse dependency order.

use crate::auth::AuthGate;
use crate::config::ApiConfig;
use crate::ratelimit::ClientRateLimiter;
use crate::telemetry::Metrics;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;
use toolmesh_adapters::{AdapterRegistry, ContextBridge};
use toolmesh_context::ContextManager;
use toolmesh_events::EventBus;
use toolmesh_storage::{
    ContextRepository, EmbeddingStore, InMemoryBlobStore, InMemoryCache, InMemoryEmbeddingStore,
    InMemoryIndexStore, TenantConfigRegistry,
};
use tracing::info;

/// Every long-lived service the API layer touches.
pub struct CoreServices {
    pub config: ApiConfig,
    pub manager: Arc<ContextManager>,
    pub bridge: Arc<ContextBridge>,
    pub registry: Arc<AdapterRegistry>,
    pub embeddings: Arc<dyn EmbeddingStore>,
    pub tenants: Arc<TenantConfigRegistry>,
    pub bus: Arc<EventBus>,
    pub limiter: Arc<ClientRateLimiter>,
    pub auth: Arc<AuthGate>,
    pub metrics: Arc<Metrics>,
    pub started_at: Instant,
}

impl CoreServices {
    /// Wire a full stack over in-memory stores. Used by the dev server and
    /// the integration tests; production swaps individual tiers in.
    pub fn in_memory(config: ApiConfig, auth: AuthGate) -> crate::error::ApiResult<Self> {
        let metrics = Arc::new(Metrics::new()?);
        let bus = Arc::new(EventBus::default());
        let embeddings: Arc<InMemoryEmbeddingStore> = Arc::new(InMemoryEmbeddingStore::new());
        let repository = Arc::new(ContextRepository::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryIndexStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        ));
        let manager = Arc::new(
            ContextManager::new(repository, embeddings.clone(), bus.clone())
                .with_truncation_recorder(metrics.clone()),
        );
        let registry = Arc::new(AdapterRegistry::new());
        let bridge = Arc::new(ContextBridge::new(manager.clone(), registry.clone()));
        let limiter = ClientRateLimiter::new(config.rate_limit.clone());

        Ok(Self {
            config,
            manager,
            bridge,
            registry,
            embeddings,
            tenants: Arc::new(TenantConfigRegistry::new()),
            bus,
            limiter,
            auth: Arc::new(auth),
            metrics,
            started_at: Instant::now(),
        })
    }

    /// Start background tasks owned by the services.
    pub fn start(&self) {
        self.limiter.clone().start_reaper();
    }

    /// Stop spawned tasks, then close components in reverse dependency
    /// order: the limiter reaper, then adapters, then the event bus.
    pub async fn shutdown(&self) {
        info!("shutting down core services");
        self.limiter.shutdown().await;
        self.registry.shutdown().await;
        self.bus.shutdown().await;
    }
}

/// Cloneable handle to [`CoreServices`] for Axum state.
#[derive(Clone)]
pub struct AppState(Arc<CoreServices>);

impl AppState {
    pub fn new(services: CoreServices) -> Self {
        Self(Arc::new(services))
    }
}

impl Deref for AppState {
    type Target = CoreServices;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
