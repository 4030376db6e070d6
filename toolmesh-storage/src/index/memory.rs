//! In-memory index store.

use super::{apply_list_options, ContextRef, IndexStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use toolmesh_core::{Context, ContextItem, ListOptions, MeshResult, StorageError};

#[derive(Default)]
struct IndexState {
    refs: HashMap<String, ContextRef>,
    items: HashMap<String, Vec<ContextItem>>,
}

/// In-memory index store backed by hash maps.
#[derive(Default)]
pub struct InMemoryIndexStore {
    state: RwLock<IndexState>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn upsert(&self, ctx: &Context) -> MeshResult<()> {
        let mut state = self.state.write().await;
        state.refs.insert(ctx.id.clone(), ContextRef::from(ctx));
        state.items.insert(ctx.id.clone(), ctx.content.clone());
        Ok(())
    }

    async fn get_ref(&self, context_id: &str) -> MeshResult<ContextRef> {
        self.state
            .read()
            .await
            .refs
            .get(context_id)
            .cloned()
            .ok_or_else(|| {
                StorageError::NotFound {
                    entity: "context",
                    id: context_id.to_string(),
                }
                .into()
            })
    }

    async fn delete(&self, context_id: &str) -> MeshResult<()> {
        let mut state = self.state.write().await;
        state.items.remove(context_id);
        match state.refs.remove(context_id) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound {
                entity: "context",
                id: context_id.to_string(),
            }
            .into()),
        }
    }

    async fn list(
        &self,
        agent_id: &str,
        session_id: Option<&str>,
        options: &ListOptions,
    ) -> MeshResult<Vec<ContextRef>> {
        let state = self.state.read().await;
        let refs: Vec<ContextRef> = state
            .refs
            .values()
            .filter(|r| r.agent_id == agent_id)
            .filter(|r| match session_id {
                Some(session) => r.session_id.as_deref() == Some(session),
                None => true,
            })
            .cloned()
            .collect();
        Ok(apply_list_options(refs, options))
    }

    async fn items(&self, context_id: &str) -> MeshResult<Vec<ContextItem>> {
        self.state
            .read()
            .await
            .items
            .get(context_id)
            .cloned()
            .ok_or_else(|| {
                StorageError::NotFound {
                    entity: "context",
                    id: context_id.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use toolmesh_core::{ContextItem, ItemRole};

    fn ctx(agent: &str, session: Option<&str>) -> Context {
        let mut c = Context::new(agent, "m1");
        c.session_id = session.map(String::from);
        c
    }

    #[tokio::test]
    async fn test_upsert_get_delete() {
        let index = InMemoryIndexStore::new();
        let mut c = ctx("a1", None);
        c.append_item(ContextItem::new(ItemRole::User, "hi", 2));
        index.upsert(&c).await.unwrap();

        let r = index.get_ref(&c.id).await.unwrap();
        assert_eq!(r.agent_id, "a1");
        assert_eq!(r.current_tokens, 2);
        assert_eq!(index.items(&c.id).await.unwrap().len(), 1);

        index.delete(&c.id).await.unwrap();
        assert!(index.get_ref(&c.id).await.unwrap_err().is_not_found());
        assert!(index.delete(&c.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters_agent_and_session() {
        let index = InMemoryIndexStore::new();
        index.upsert(&ctx("a1", Some("s1"))).await.unwrap();
        index.upsert(&ctx("a1", Some("s2"))).await.unwrap();
        index.upsert(&ctx("a2", Some("s1"))).await.unwrap();

        let all = index
            .list("a1", None, &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let s1 = index
            .list("a1", Some("s1"), &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_list_time_bounds_inclusive_and_pagination() {
        let index = InMemoryIndexStore::new();
        let mut contexts = Vec::new();
        let base = chrono::Utc::now();
        for i in 0..5 {
            let mut c = ctx("a1", None);
            c.created_at = base + Duration::seconds(i);
            index.upsert(&c).await.unwrap();
            contexts.push(c);
        }

        let bounded = index
            .list(
                "a1",
                None,
                &ListOptions {
                    created_after: Some(contexts[1].created_at),
                    created_before: Some(contexts[3].created_at),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(bounded.len(), 3, "time bounds are inclusive");

        let page = index
            .list(
                "a1",
                None,
                &ListOptions {
                    limit: Some(2),
                    offset: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        // Newest first: offset 1 skips the newest.
        assert_eq!(page[0].id, contexts[3].id);
    }
}
