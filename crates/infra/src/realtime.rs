use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use metrics::counter;
use tokio::sync::mpsc::{self, UnboundedSender};

use maplewire_domain::ports::realtime::{
    ChannelKey, RealtimeBus, RealtimeSubscription, RowEvent,
};
use maplewire_domain::ports::BoxFuture;
use maplewire_domain::DomainResult;

const EVENTS_PUBLISHED_TOTAL: &str = "maplewire_realtime_events_published_total";
const EVENTS_DROPPED_TOTAL: &str = "maplewire_realtime_events_dropped_total";
const SUBSCRIBES_TOTAL: &str = "maplewire_realtime_subscribes_total";

type Registry = Arc<RwLock<HashMap<ChannelKey, HashMap<u64, UnboundedSender<RowEvent>>>>>;

/// In-process fan-out over per-channel subscriber lists. Delivery within one
/// channel preserves publish order; a closed subscription is unregistered
/// before the canceller returns, so tearing down and resubscribing the same
/// filter never leaves a stale registration behind.
#[derive(Default)]
pub struct LocalRealtimeBus {
    registry: Registry,
    next_subscriber_id: AtomicU64,
}

impl LocalRealtimeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, channel: &ChannelKey) -> usize {
        read_registry(&self.registry)
            .get(channel)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

impl RealtimeBus for LocalRealtimeBus {
    fn subscribe(&self, channel: &ChannelKey) -> BoxFuture<'_, DomainResult<RealtimeSubscription>> {
        let channel = channel.clone();
        let registry = self.registry.clone();
        let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        Box::pin(async move {
            let (sender, receiver) = mpsc::unbounded_channel();
            write_registry(&registry)
                .entry(channel.clone())
                .or_default()
                .insert(subscriber_id, sender);
            counter!(SUBSCRIBES_TOTAL).increment(1);
            tracing::debug!(channel = %channel, subscriber_id, "realtime subscribe");

            let cancel_registry = registry.clone();
            let cancel_channel = channel.clone();
            let canceller = Box::new(move || {
                let mut registry = write_registry(&cancel_registry);
                if let Some(subscribers) = registry.get_mut(&cancel_channel) {
                    subscribers.remove(&subscriber_id);
                    if subscribers.is_empty() {
                        registry.remove(&cancel_channel);
                    }
                }
            });
            Ok(RealtimeSubscription::new(receiver, canceller))
        })
    }

    fn publish(&self, channel: &ChannelKey, event: RowEvent) -> BoxFuture<'_, DomainResult<()>> {
        let channel = channel.clone();
        let registry = self.registry.clone();
        Box::pin(async move {
            let mut dead = Vec::new();
            {
                let registry = read_registry(&registry);
                let Some(subscribers) = registry.get(&channel) else {
                    return Ok(());
                };
                for (subscriber_id, sender) in subscribers {
                    if sender.send(event.clone()).is_err() {
                        dead.push(*subscriber_id);
                    }
                }
                counter!(EVENTS_PUBLISHED_TOTAL).increment(1);
            }

            if !dead.is_empty() {
                counter!(EVENTS_DROPPED_TOTAL).increment(dead.len() as u64);
                let mut registry = write_registry(&registry);
                if let Some(subscribers) = registry.get_mut(&channel) {
                    for subscriber_id in dead {
                        subscribers.remove(&subscriber_id);
                    }
                    if subscribers.is_empty() {
                        registry.remove(&channel);
                    }
                }
            }
            Ok(())
        })
    }
}

// Lock poisoning only happens if a holder panicked; the registry itself is
// still consistent, so recover the guard.
fn read_registry(
    registry: &Registry,
) -> std::sync::RwLockReadGuard<'_, HashMap<ChannelKey, HashMap<u64, UnboundedSender<RowEvent>>>> {
    registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_registry(
    registry: &Registry,
) -> std::sync::RwLockWriteGuard<'_, HashMap<ChannelKey, HashMap<u64, UnboundedSender<RowEvent>>>> {
    registry.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: u32) -> RowEvent {
        RowEvent::insert(&json!({ "n": n })).expect("event")
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = LocalRealtimeBus::new();
        let channel = ChannelKey::chat_room("room-1");
        let mut subscription = bus.subscribe(&channel).await.expect("subscribe");
        for n in 0..3 {
            bus.publish(&channel, event(n)).await.expect("publish");
        }
        for n in 0..3 {
            let received = subscription.recv().await.expect("event");
            assert_eq!(received.row["n"], n);
        }
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = LocalRealtimeBus::new();
        let mut room = bus
            .subscribe(&ChannelKey::chat_room("room-1"))
            .await
            .expect("subscribe");
        bus.publish(&ChannelKey::chat_room("room-2"), event(1))
            .await
            .expect("publish");
        bus.publish(&ChannelKey::notifications_for("user-1"), event(2))
            .await
            .expect("publish");
        assert!(room.try_recv().is_none());
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_event() {
        let bus = LocalRealtimeBus::new();
        let channel = ChannelKey::notifications_for("user-1");
        let mut first = bus.subscribe(&channel).await.expect("first");
        let mut second = bus.subscribe(&channel).await.expect("second");
        bus.publish(&channel, event(7)).await.expect("publish");
        assert_eq!(first.recv().await.expect("first event").row["n"], 7);
        assert_eq!(second.recv().await.expect("second event").row["n"], 7);
    }

    #[tokio::test]
    async fn close_unregisters_before_returning() {
        let bus = LocalRealtimeBus::new();
        let channel = ChannelKey::chat_room("room-1");
        let subscription = bus.subscribe(&channel).await.expect("subscribe");
        assert_eq!(bus.subscriber_count(&channel), 1);
        subscription.close();
        assert_eq!(bus.subscriber_count(&channel), 0);
        // Publishing into the now-empty channel is harmless.
        bus.publish(&channel, event(1)).await.expect("publish");
    }

    #[tokio::test]
    async fn drop_unregisters_as_a_fallback() {
        let bus = LocalRealtimeBus::new();
        let channel = ChannelKey::chat_room("room-1");
        {
            let _subscription = bus.subscribe(&channel).await.expect("subscribe");
            assert_eq!(bus.subscriber_count(&channel), 1);
        }
        assert_eq!(bus.subscriber_count(&channel), 0);
    }

    #[tokio::test]
    async fn resubscribing_after_close_yields_a_clean_stream() {
        let bus = LocalRealtimeBus::new();
        let channel = ChannelKey::chat_room("room-1");
        let first = bus.subscribe(&channel).await.expect("first");
        bus.publish(&channel, event(1)).await.expect("publish");
        first.close();

        let mut second = bus.subscribe(&channel).await.expect("second");
        bus.publish(&channel, event(2)).await.expect("publish");
        let received = second.recv().await.expect("event");
        assert_eq!(received.row["n"], 2);
        assert!(second.try_recv().is_none());
    }
}
