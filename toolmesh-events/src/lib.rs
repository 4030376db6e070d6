//! Toolmesh Events - In-Process Pub/Sub
//!
//! Message-passing event bus: subscribers register a channel for one event
//! kind (or the wildcard `all`) and pick a delivery policy at registration.
//! Publication delivers into subscriber channels under a concurrency limit;
//! when the limit is reached, publishers block until a slot frees up.
//!
//! ## Ordering
//!
//! A single-threaded publisher's events reach each subscriber in publish
//! order. No ordering is guaranteed across subscribers or across publishers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use toolmesh_core::ContextEvent;
use tracing::{debug, warn};

/// Subscription key matching every event kind.
pub const WILDCARD: &str = "all";

/// Default bound on concurrent publications.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 64;

/// What to do when a subscriber's channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Await channel capacity; applies backpressure to the publisher.
    Block,
    /// Drop the event for this subscriber and keep going.
    DropNewest,
}

struct SubscriberEntry {
    id: u64,
    tx: mpsc::Sender<ContextEvent>,
    policy: DeliveryPolicy,
}

/// A registered subscription. Dropping it detaches the subscriber; the bus
/// prunes closed channels on the next publish.
pub struct Subscription {
    pub id: u64,
    rx: mpsc::Receiver<ContextEvent>,
}

impl Subscription {
    /// Receive the next event. `None` once the bus has shut down and the
    /// channel drained.
    pub async fn recv(&mut self) -> Option<ContextEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<ContextEvent> {
        self.rx.try_recv().ok()
    }
}

/// In-process pub/sub with per-kind subscriber lists plus a wildcard list.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<SubscriberEntry>>>,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a bus bounded to `concurrency_limit` concurrent publications.
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber channel for one event kind (or [`WILDCARD`]).
    pub async fn subscribe(
        &self,
        event_type: &str,
        capacity: usize,
        policy: DeliveryPolicy,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(event_type.to_string())
            .or_default()
            .push(SubscriberEntry { id, tx, policy });

        debug!(event_type, id, "subscriber registered");
        Subscription { id, rx }
    }

    /// Remove a subscription by id. Unknown ids are ignored.
    pub async fn unsubscribe(&self, event_type: &str, id: u64) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(entries) = subscribers.get_mut(event_type) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                subscribers.remove(event_type);
            }
        }
    }

    /// Publish an event to matching subscribers and the wildcard list.
    ///
    /// Sender handles are cloned under the read lock and delivery happens
    /// outside it. Blocks when the concurrency limit is saturated.
    pub async fn publish(&self, event: ContextEvent) {
        // Closed on shutdown; publishing after shutdown is a no-op.
        let Ok(_permit) = self.permits.acquire().await else {
            return;
        };

        let kind = event.event_type.as_str().to_string();
        let targets: Vec<(mpsc::Sender<ContextEvent>, DeliveryPolicy)> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .get(&kind)
                .into_iter()
                .chain(subscribers.get(WILDCARD))
                .flatten()
                .map(|e| (e.tx.clone(), e.policy))
                .collect()
        };

        let mut closed = false;
        for (tx, policy) in targets {
            match policy {
                DeliveryPolicy::Block => {
                    if tx.send(event.clone()).await.is_err() {
                        closed = true;
                    }
                }
                DeliveryPolicy::DropNewest => match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(event_type = %kind, "subscriber channel full, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed = true;
                    }
                },
            }
        }

        if closed {
            self.prune(&kind).await;
        }
    }

    /// Drop subscriber entries whose receiver has gone away.
    async fn prune(&self, kind: &str) {
        let mut subscribers = self.subscribers.write().await;
        for key in [kind, WILDCARD] {
            if let Some(entries) = subscribers.get_mut(key) {
                entries.retain(|e| !e.tx.is_closed());
                if entries.is_empty() {
                    subscribers.remove(key);
                }
            }
        }
    }

    /// Number of live subscriptions across all kinds.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.values().map(Vec::len).sum()
    }

    /// Shut the bus down: stop accepting publications and close every
    /// subscriber channel.
    pub async fn shutdown(&self) {
        self.permits.close();
        self.subscribers.write().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use toolmesh_core::EventKind;

    fn event(kind: EventKind) -> ContextEvent {
        ContextEvent::new("context_manager", kind, "a1")
    }

    #[tokio::test]
    async fn test_kind_and_wildcard_delivery() {
        let bus = EventBus::default();
        let mut created = bus
            .subscribe("context_created", 8, DeliveryPolicy::Block)
            .await;
        let mut all = bus.subscribe(WILDCARD, 8, DeliveryPolicy::Block).await;
        let mut deleted = bus
            .subscribe("context_deleted", 8, DeliveryPolicy::Block)
            .await;

        bus.publish(event(EventKind::ContextCreated)).await;

        assert_eq!(
            created.recv().await.unwrap().event_type,
            EventKind::ContextCreated
        );
        assert_eq!(
            all.recv().await.unwrap().event_type,
            EventKind::ContextCreated
        );
        assert!(deleted.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_order_preserved_per_subscriber() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe(WILDCARD, 16, DeliveryPolicy::Block).await;

        for i in 0..10 {
            bus.publish(
                event(EventKind::ContextUpdated)
                    .with_data(serde_json::json!({ "seq": i })),
            )
            .await;
        }

        for i in 0..10 {
            let received = sub.recv().await.unwrap();
            assert_eq!(received.data["seq"], i);
        }
    }

    #[tokio::test]
    async fn test_drop_newest_sheds_on_full_channel() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe(WILDCARD, 1, DeliveryPolicy::DropNewest).await;

        bus.publish(event(EventKind::ContextCreated)).await;
        bus.publish(event(EventKind::ContextUpdated)).await;

        assert_eq!(
            sub.recv().await.unwrap().event_type,
            EventKind::ContextCreated
        );
        assert!(sub.try_recv().is_none(), "second event was shed");
    }

    #[tokio::test]
    async fn test_block_policy_applies_backpressure() {
        let bus = Arc::new(EventBus::default());
        let mut sub = bus.subscribe(WILDCARD, 1, DeliveryPolicy::Block).await;

        bus.publish(event(EventKind::ContextCreated)).await;

        // The channel is full, so the next publish cannot finish until the
        // subscriber drains.
        let blocked = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(event(EventKind::ContextUpdated)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        sub.recv().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("publish should finish once drained")
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::default();
        let sub = bus.subscribe("context_created", 8, DeliveryPolicy::Block).await;
        assert_eq!(bus.subscriber_count().await, 1);

        bus.unsubscribe("context_created", sub.id).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_receivers_are_pruned() {
        let bus = EventBus::default();
        let sub = bus.subscribe(WILDCARD, 8, DeliveryPolicy::Block).await;
        drop(sub);

        bus.publish(event(EventKind::ContextCreated)).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_channels_and_ignores_publishes() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe(WILDCARD, 8, DeliveryPolicy::Block).await;

        bus.shutdown().await;
        assert!(sub.recv().await.is_none());

        // Publishing after shutdown is a no-op rather than a hang.
        bus.publish(event(EventKind::ContextCreated)).await;
    }
}
