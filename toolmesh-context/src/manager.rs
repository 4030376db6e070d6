//! Context lifecycle manager.
//!
//! All context mutation flows through this type: creation, merge/append
//! updates, truncation, deletion with cascade, and listing. The manager owns
//! the write ordering (index reference, then blob, then cache) through the
//! repository and emits a lifecycle event after each successful mutation.
//!
//! Concurrency: there is no per-context lock. Concurrent updates to the same
//! context are last-write-wins across the storage tiers; callers needing
//! strict ordering must coordinate externally.

use crate::{ContextSummarizer, DescriptorSummarizer};
use chrono::Utc;
use std::sync::Arc;
use toolmesh_core::{
    truncate, BudgetError, Context, ContextEvent, ContextItem, ContextPatch, EventKind,
    ListOptions, MeshError, MeshResult, RelevanceScorer, Summarizer, TruncationKind,
    TruncationOutcome, TruncationStrategy, UpdateOptions,
};
use toolmesh_events::EventBus;
use toolmesh_storage::{ContextRepository, EmbeddingStore};
use tracing::{debug, warn};
use uuid::Uuid;

/// Event source tag for manager-emitted events.
const EVENT_SOURCE: &str = "context_manager";

/// Sink for truncation telemetry. The API layer implements this over its
/// metrics registry; the manager stays free of any metrics dependency.
pub trait TruncationRecorder: Send + Sync {
    fn record_truncation(&self, strategy: TruncationKind, outcome: TruncationOutcome);
}

/// Context manager over the storage tiers, the embedding store (for delete
/// cascade), and the event bus.
pub struct ContextManager {
    repository: Arc<ContextRepository>,
    embeddings: Arc<dyn EmbeddingStore>,
    bus: Arc<EventBus>,
    summarizer: Arc<dyn ContextSummarizer>,
    relevance_scorer: Option<Arc<dyn RelevanceScorer>>,
    compression_summarizer: Option<Arc<dyn Summarizer>>,
    truncation_recorder: Option<Arc<dyn TruncationRecorder>>,
}

impl ContextManager {
    pub fn new(
        repository: Arc<ContextRepository>,
        embeddings: Arc<dyn EmbeddingStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            repository,
            embeddings,
            bus,
            summarizer: Arc::new(DescriptorSummarizer),
            relevance_scorer: None,
            compression_summarizer: None,
            truncation_recorder: None,
        }
    }

    /// Substitute the summarizer used by [`ContextManager::summarize`].
    pub fn with_summarizer(mut self, summarizer: Arc<dyn ContextSummarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Provide the collaborator backing the relevance-based truncation
    /// strategy. Without one the strategy degrades to oldest-first.
    pub fn with_relevance_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.relevance_scorer = Some(scorer);
        self
    }

    /// Provide the collaborator backing the compression truncation strategy.
    pub fn with_compression_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.compression_summarizer = Some(summarizer);
        self
    }

    /// Attach a sink that observes every truncation pass.
    pub fn with_truncation_recorder(mut self, recorder: Arc<dyn TruncationRecorder>) -> Self {
        self.truncation_recorder = Some(recorder);
        self
    }

    /// The bus this manager publishes lifecycle events into.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Create a context. Generates an id when absent, stamps both timestamps
    /// with the same instant, validates required fields, and persists through
    /// the repository. Emits `context_created`.
    pub async fn create(&self, mut ctx: Context) -> MeshResult<Context> {
        if ctx.id.is_empty() {
            ctx.id = Uuid::now_v7().to_string();
        }
        let now = Utc::now();
        ctx.created_at = now;
        ctx.updated_at = now;
        ctx.validate().map_err(MeshError::Validation)?;
        ctx.recount_tokens();

        self.repository.save(&ctx).await?;
        debug!(context_id = %ctx.id, agent_id = %ctx.agent_id, "context created");

        self.publish(EventKind::ContextCreated, &ctx).await;
        Ok(ctx)
    }

    /// Fetch a context. Cache hits short-circuit; misses and cache errors
    /// fall through to the blob store.
    pub async fn get(&self, context_id: &str) -> MeshResult<Context> {
        self.repository.load(context_id).await
    }

    /// Read-modify-write update.
    ///
    /// Scalar fields merge when present, metadata merges key-wise (never
    /// replaced wholesale), and content appends unless
    /// `options.replace_content`. When `options.truncate` is set and the
    /// budget is exceeded, the selected strategy runs; a context still over
    /// budget afterwards fails with `ContextTooLarge` and nothing is written.
    pub async fn update(
        &self,
        context_id: &str,
        patch: ContextPatch,
        options: &UpdateOptions,
    ) -> MeshResult<Context> {
        let mut ctx = self.repository.load(context_id).await?;

        if let Some(agent_id) = patch.agent_id.filter(|s| !s.is_empty()) {
            ctx.agent_id = agent_id;
        }
        if let Some(session_id) = patch.session_id.filter(|s| !s.is_empty()) {
            ctx.session_id = Some(session_id);
        }
        if let Some(model_id) = patch.model_id.filter(|s| !s.is_empty()) {
            ctx.model_id = model_id;
        }
        if let Some(max_tokens) = patch.max_tokens {
            ctx.max_tokens = max_tokens;
        }
        if let Some(expires_at) = patch.expires_at {
            ctx.expires_at = Some(expires_at);
        }
        ctx.metadata.extend(patch.metadata);

        if options.replace_content {
            ctx.content = patch.content;
        } else {
            ctx.content.extend(patch.content);
        }
        ctx.recount_tokens();

        if options.truncate && ctx.max_tokens > 0 && ctx.over_budget() {
            let kind = options.truncate_strategy.unwrap_or_default();
            let strategy = TruncationStrategy::resolve(
                kind,
                self.relevance_scorer.clone(),
                self.compression_summarizer.clone(),
            );
            let outcome = truncate(&mut ctx, &strategy);
            if let Some(recorder) = &self.truncation_recorder {
                recorder.record_truncation(kind, outcome);
            }
            debug!(
                context_id = %ctx.id,
                strategy = kind.as_str(),
                outcome = outcome.as_str(),
                "truncation applied"
            );
            if ctx.over_budget() {
                return Err(BudgetError::ContextTooLarge {
                    context_id: ctx.id.clone(),
                    current_tokens: ctx.current_tokens,
                    max_tokens: ctx.max_tokens,
                }
                .into());
            }
        }

        // Keep updated_at monotonic within this context's lifetime even under
        // clock adjustment.
        ctx.updated_at = Utc::now().max(ctx.updated_at);

        self.repository.save(&ctx).await?;
        self.publish(EventKind::ContextUpdated, &ctx).await;
        Ok(ctx)
    }

    /// Convenience append routed through [`ContextManager::update`].
    pub async fn append_items(
        &self,
        context_id: &str,
        items: Vec<ContextItem>,
    ) -> MeshResult<Context> {
        self.update(context_id, ContextPatch::items(items), &UpdateOptions::default())
            .await
    }

    /// Delete a context, cascading to items, embeddings, and cache. The blob
    /// delete decides the outcome; embedding, index, and cache tails only
    /// warn. Emits `context_deleted` enriched from the read context.
    pub async fn delete(&self, context_id: &str) -> MeshResult<()> {
        let ctx = self.repository.load(context_id).await?;

        if let Err(e) = self.embeddings.delete_by_context(context_id).await {
            warn!(context_id, error = %e, "embedding cascade failed during delete");
        }
        self.repository.remove(context_id).await?;

        self.publish(EventKind::ContextDeleted, &ctx).await;
        Ok(())
    }

    /// List an agent's contexts. The index supplies references; each is
    /// hydrated through `get`, so repeated listings ride the cache. A
    /// reference whose body has vanished is skipped with a warning.
    pub async fn list(
        &self,
        agent_id: &str,
        session_id: Option<&str>,
        options: &ListOptions,
    ) -> MeshResult<Vec<Context>> {
        if agent_id.trim().is_empty() {
            return Err(MeshError::missing_field("agent_id"));
        }

        let refs = self
            .repository
            .list_refs(agent_id, session_id, options)
            .await?;

        let mut contexts = Vec::with_capacity(refs.len());
        for r in refs {
            match self.get(&r.id).await {
                Ok(ctx) => contexts.push(ctx),
                Err(e) if e.is_not_found() => {
                    warn!(context_id = %r.id, "index reference without blob body, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(contexts)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Summarize a context through the configured summarizer.
    pub async fn summarize(&self, context_id: &str) -> MeshResult<String> {
        let ctx = self.get(context_id).await?;
        Ok(self.summarizer.summarize(&ctx).await)
    }

    /// Case-insensitive substring search over item content. Not semantic
    /// search; that lives in the embedding store.
    pub async fn search_in_context(
        &self,
        context_id: &str,
        query: &str,
    ) -> MeshResult<Vec<ContextItem>> {
        let ctx = self.get(context_id).await?;
        Ok(ctx.search_items(query).into_iter().cloned().collect())
    }

    /// The item list of a context.
    pub async fn get_items(&self, context_id: &str) -> MeshResult<Vec<ContextItem>> {
        Ok(self.get(context_id).await?.content)
    }

    async fn publish(&self, kind: EventKind, ctx: &Context) {
        let event = ContextEvent::new(EVENT_SOURCE, kind, ctx.agent_id.clone())
            .with_session(ctx.session_id.clone())
            .with_data(serde_json::json!({
                "context_id": ctx.id,
                "current_tokens": ctx.current_tokens,
            }));
        self.bus.publish(event).await;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use toolmesh_core::{ItemRole, TruncationKind};
    use toolmesh_events::{DeliveryPolicy, WILDCARD};
    use toolmesh_storage::{
        InMemoryBlobStore, InMemoryCache, InMemoryEmbeddingStore, InMemoryIndexStore,
    };

    fn manager() -> (ContextManager, Arc<InMemoryEmbeddingStore>, Arc<EventBus>) {
        let repository = Arc::new(ContextRepository::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryIndexStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        ));
        let embeddings = Arc::new(InMemoryEmbeddingStore::new());
        let bus = Arc::new(EventBus::default());
        (
            ContextManager::new(repository, embeddings.clone(), bus.clone()),
            embeddings,
            bus,
        )
    }

    fn item(role: ItemRole, tokens: u32) -> ContextItem {
        ContextItem::new(role, "content", tokens)
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let (manager, _, _) = manager();
        let created = manager
            .create(Context::new("a1", "m1").with_max_tokens(4000))
            .await
            .unwrap();
        assert!(!created.id.is_empty());
        assert_eq!(created.created_at, created.updated_at);

        let fetched = manager.get(&created.id).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.agent_id, "a1");
        assert_eq!(fetched.model_id, "m1");
        assert_eq!(fetched.current_tokens, 0);
    }

    #[tokio::test]
    async fn test_create_generates_id_only_when_absent() {
        let (manager, _, _) = manager();
        let mut ctx = Context::new("a1", "m1");
        ctx.id = "caller-chosen".to_string();
        let created = manager.create(ctx).await.unwrap();
        assert_eq!(created.id, "caller-chosen");
    }

    #[tokio::test]
    async fn test_create_validates_required_fields() {
        let (manager, _, _) = manager();
        let mut ctx = Context::new("", "m1");
        ctx.id = String::new();
        let err = manager.create(ctx).await.unwrap_err();
        assert!(matches!(err, MeshError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_appends_and_recounts() {
        let (manager, _, _) = manager();
        let created = manager.create(Context::new("a1", "m1")).await.unwrap();

        let updated = manager
            .append_items(
                &created.id,
                vec![item(ItemRole::User, 5), item(ItemRole::Assistant, 7)],
            )
            .await
            .unwrap();

        assert_eq!(updated.content.len(), 2);
        assert_eq!(updated.current_tokens, 12);
        assert_eq!(updated.current_tokens, updated.token_sum());
        assert!(updated.updated_at >= updated.created_at);
    }

    #[tokio::test]
    async fn test_update_merges_metadata_never_replaces() {
        let (manager, _, _) = manager();
        let mut ctx = Context::new("a1", "m1");
        ctx.metadata
            .insert("env".to_string(), serde_json::json!("prod"));
        let created = manager.create(ctx).await.unwrap();

        let mut patch = ContextPatch::default();
        patch
            .metadata
            .insert("region".to_string(), serde_json::json!("eu"));
        let updated = manager
            .update(&created.id, patch, &UpdateOptions::default())
            .await
            .unwrap();

        assert_eq!(updated.metadata["env"], "prod");
        assert_eq!(updated.metadata["region"], "eu");
    }

    #[tokio::test]
    async fn test_update_replace_content() {
        let (manager, _, _) = manager();
        let created = manager.create(Context::new("a1", "m1")).await.unwrap();
        manager
            .append_items(&created.id, vec![item(ItemRole::User, 5)])
            .await
            .unwrap();

        let options = UpdateOptions {
            replace_content: true,
            ..Default::default()
        };
        let updated = manager
            .update(
                &created.id,
                ContextPatch::items(vec![item(ItemRole::System, 2)]),
                &options,
            )
            .await
            .unwrap();

        assert_eq!(updated.content.len(), 1);
        assert_eq!(updated.current_tokens, 2);
    }

    #[tokio::test]
    async fn test_update_truncates_oldest_first() {
        let (manager, _, _) = manager();
        let created = manager
            .create(Context::new("a1", "m1").with_max_tokens(10))
            .await
            .unwrap();
        manager
            .append_items(
                &created.id,
                vec![
                    item(ItemRole::User, 5),
                    item(ItemRole::Assistant, 5),
                    item(ItemRole::User, 5),
                ],
            )
            .await
            .unwrap();

        let updated = manager
            .update(
                &created.id,
                ContextPatch::items(vec![item(ItemRole::User, 0)]),
                &UpdateOptions::truncating(TruncationKind::OldestFirst),
            )
            .await
            .unwrap();

        assert_eq!(updated.content.len(), 3);
        assert_eq!(updated.current_tokens, 10);
    }

    #[tokio::test]
    async fn test_truncation_recorder_observes_strategy_and_outcome() {
        struct Capture(std::sync::Mutex<Vec<(TruncationKind, TruncationOutcome)>>);
        impl TruncationRecorder for Capture {
            fn record_truncation(&self, strategy: TruncationKind, outcome: TruncationOutcome) {
                self.0.lock().unwrap().push((strategy, outcome));
            }
        }

        let capture = Arc::new(Capture(std::sync::Mutex::new(Vec::new())));
        let repository = Arc::new(ContextRepository::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryIndexStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        ));
        let manager = ContextManager::new(
            repository,
            Arc::new(InMemoryEmbeddingStore::new()),
            Arc::new(EventBus::default()),
        )
        .with_truncation_recorder(capture.clone());

        let created = manager
            .create(Context::new("a1", "m1").with_max_tokens(10))
            .await
            .unwrap();

        // Within budget: no truncation pass, nothing recorded.
        manager
            .update(
                &created.id,
                ContextPatch::items(vec![item(ItemRole::User, 5)]),
                &UpdateOptions::truncating(TruncationKind::OldestFirst),
            )
            .await
            .unwrap();
        assert!(capture.0.lock().unwrap().is_empty());

        // Over budget: oldest-first converges on its own.
        manager
            .update(
                &created.id,
                ContextPatch::items(vec![item(ItemRole::User, 8)]),
                &UpdateOptions::truncating(TruncationKind::OldestFirst),
            )
            .await
            .unwrap();

        // A single oversized reserved item forces preserve_user to fall back.
        manager
            .update(
                &created.id,
                ContextPatch::items(vec![item(ItemRole::User, 50)]),
                &UpdateOptions::truncating(TruncationKind::PreserveUser),
            )
            .await
            .unwrap();

        let recorded = capture.0.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                (TruncationKind::OldestFirst, TruncationOutcome::Converged),
                (TruncationKind::PreserveUser, TruncationOutcome::FellBack),
            ]
        );
    }

    #[tokio::test]
    async fn test_update_without_truncate_flag_may_exceed_budget() {
        let (manager, _, _) = manager();
        let created = manager
            .create(Context::new("a1", "m1").with_max_tokens(4))
            .await
            .unwrap();

        let updated = manager
            .append_items(&created.id, vec![item(ItemRole::User, 10)])
            .await
            .unwrap();
        assert_eq!(updated.current_tokens, 10);
    }

    #[tokio::test]
    async fn test_update_truncation_can_empty_the_context() {
        let (manager, _, _) = manager();
        let created = manager
            .create(Context::new("a1", "m1").with_max_tokens(5))
            .await
            .unwrap();

        // A single item larger than the whole budget: preserve_user reserves
        // it, stays over, and the oldest-first fallback drops it entirely.
        let updated = manager
            .update(
                &created.id,
                ContextPatch::items(vec![item(ItemRole::User, 50)]),
                &UpdateOptions::truncating(TruncationKind::PreserveUser),
            )
            .await
            .unwrap();
        assert!(updated.content.is_empty());
        assert_eq!(updated.current_tokens, 0);
    }

    #[tokio::test]
    async fn test_update_over_budget_with_summarizer_that_inflates() {
        // A compression summarizer can only make the guard reachable if its
        // replacement item still fits nothing; the oldest-first fallback then
        // clears the context, so the update succeeds within budget.
        struct Inflating;
        impl Summarizer for Inflating {
            fn compress(&self, _items: &[ContextItem]) -> Option<ContextItem> {
                Some(ContextItem::new(ItemRole::System, "huge summary", 1000))
            }
        }

        let repository = Arc::new(ContextRepository::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryIndexStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        ));
        let manager = ContextManager::new(
            repository,
            Arc::new(InMemoryEmbeddingStore::new()),
            Arc::new(EventBus::default()),
        )
        .with_compression_summarizer(Arc::new(Inflating));

        let created = manager
            .create(Context::new("a1", "m1").with_max_tokens(10))
            .await
            .unwrap();
        let updated = manager
            .update(
                &created.id,
                ContextPatch::items(vec![
                    item(ItemRole::User, 8),
                    item(ItemRole::Assistant, 8),
                ]),
                &UpdateOptions::truncating(TruncationKind::Compression),
            )
            .await
            .unwrap();
        assert!(updated.current_tokens <= 10);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_embeddings() {
        let (manager, embeddings, _) = manager();
        let created = manager.create(Context::new("a1", "m1")).await.unwrap();
        embeddings
            .store(toolmesh_core::Embedding::new(
                &created.id,
                0,
                "chunk",
                vec![1.0, 0.0],
                "m1",
            ))
            .await
            .unwrap();

        manager.delete(&created.id).await.unwrap();

        assert!(manager.get(&created.id).await.unwrap_err().is_not_found());
        assert!(embeddings
            .get_by_context(&created.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (manager, _, _) = manager();
        assert!(manager.delete("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_requires_agent_id() {
        let (manager, _, _) = manager();
        let err = manager
            .list("", None, &ListOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_hydrates_contexts() {
        let (manager, _, _) = manager();
        let a = manager
            .create(Context::new("a1", "m1").with_session("s1"))
            .await
            .unwrap();
        manager.create(Context::new("a1", "m1")).await.unwrap();
        manager.create(Context::new("a2", "m1")).await.unwrap();

        let all = manager
            .list("a1", None, &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|c| c.agent_id == "a1"));

        let scoped = manager
            .list("a1", Some("s1"), &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, a.id);
    }

    #[tokio::test]
    async fn test_summarize_descriptor() {
        let (manager, _, _) = manager();
        let created = manager.create(Context::new("a1", "m1")).await.unwrap();
        manager
            .append_items(
                &created.id,
                vec![item(ItemRole::User, 5), item(ItemRole::Assistant, 5)],
            )
            .await
            .unwrap();

        let summary = manager.summarize(&created.id).await.unwrap();
        assert_eq!(summary, "Context with 2 messages and 10 tokens");
    }

    #[tokio::test]
    async fn test_search_in_context() {
        let (manager, _, _) = manager();
        let created = manager.create(Context::new("a1", "m1")).await.unwrap();
        manager
            .append_items(
                &created.id,
                vec![
                    ContextItem::new(ItemRole::User, "roll back the deploy", 4),
                    ContextItem::new(ItemRole::Assistant, "rolled back", 2),
                ],
            )
            .await
            .unwrap();

        let hits = manager
            .search_in_context(&created.id, "DEPLOY")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "roll back the deploy");

        assert!(manager
            .search_in_context(&created.id, "")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_events_published() {
        let (manager, _, bus) = manager();
        let mut sub = bus.subscribe(WILDCARD, 16, DeliveryPolicy::Block).await;

        let created = manager.create(Context::new("a1", "m1")).await.unwrap();
        manager
            .append_items(&created.id, vec![item(ItemRole::User, 1)])
            .await
            .unwrap();
        manager.delete(&created.id).await.unwrap();

        let kinds: Vec<EventKind> = vec![
            sub.recv().await.unwrap().event_type,
            sub.recv().await.unwrap().event_type,
            sub.recv().await.unwrap().event_type,
        ];
        assert_eq!(
            kinds,
            vec![
                EventKind::ContextCreated,
                EventKind::ContextUpdated,
                EventKind::ContextDeleted,
            ]
        );
    }
}
