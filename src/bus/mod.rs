//! In-process event bus (§4.9): topic-typed pub/sub fanning status events out to
//! WebSocket and MCP subscribers.
//!
//! Built directly on `tokio::sync::broadcast`, which already gives the exact
//! semantics §4.9 asks for: every subscriber gets its own cursor into a shared ring
//! buffer, `send` never blocks (a full buffer overwrites its oldest slot instead), and
//! a receiver that falls more than `capacity` events behind is told precisely how many
//! it missed (`RecvError::Lagged`) rather than silently resuming mid-stream. That lag
//! count is this module's `drop_count`. A single channel carries every topic, which
//! trivially satisfies "per-topic ordering, no cross-topic guarantee" by providing the
//! stronger total order.

use tokio::sync::broadcast;

use crate::index::IndexEvent;
use crate::sync::SyncEvent;
use crate::watch::FsEvent;

/// Every event the bus can carry, tagged by topic (§4.9: filesystem events,
/// `index_status`/`index_complete`, `sync_status`, `{provider}_connected`).
#[derive(Debug, Clone)]
pub enum Event {
    Fs(FsEvent),
    Index(IndexEvent),
    Sync(SyncEvent),
    ProviderConnected { provider: String, folder_path: String },
    Ping,
}

pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(crate::constants::DEFAULT_EVENT_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to every current subscriber. Never blocks; an event published
    /// with zero subscribers is simply dropped, same as one pushed past a full buffer.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            total_dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the bus. Not `Clone` — each subscriber owns its own lag
/// cursor, per §4.9's "multiple subscribers receive each event independently".
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    total_dropped: u64,
}

/// An event plus how many prior events this subscriber missed immediately before it,
/// due to falling behind a full buffer.
pub struct Received {
    pub event: Event,
    pub dropped: u64,
}

impl Subscription {
    /// Await the next event, transparently skipping past lag gaps and accumulating
    /// the drop count rather than surfacing `Lagged` as an error to the caller.
    pub async fn recv(&mut self) -> Option<Received> {
        let mut dropped = 0u64;
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    self.total_dropped += dropped;
                    return Some(Received { event, dropped });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    dropped += skipped;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Cumulative count of events this subscriber has ever missed, for clients that
    /// want a running total rather than per-receive deltas.
    pub fn drop_count(&self) -> u64 {
        self.total_dropped
    }
}

impl crate::index::EventSink for EventBus {
    fn emit(&self, event: IndexEvent) {
        self.publish(Event::Index(event));
    }
}

impl crate::sync::SyncEventSink for EventBus {
    fn emit(&self, event: SyncEvent) {
        self.publish(Event::Sync(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::PathInfo;
    use std::path::PathBuf;

    fn path_info(logical: &str) -> PathInfo {
        PathInfo {
            absolute: PathBuf::from(logical),
            logical: logical.to_string(),
            is_dir: false,
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(Event::Fs(FsEvent::Created(path_info("a.txt"))));
        let received = sub.recv().await.unwrap();
        assert!(matches!(received.event, Event::Fs(FsEvent::Created(_))));
        assert_eq!(received.dropped, 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive_independently() {
        let bus = EventBus::new();
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        bus.publish(Event::Ping);
        assert!(sub1.recv().await.is_some());
        assert!(sub2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::Ping);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_and_reports_count() {
        let bus = EventBus::with_capacity(2);
        let mut sub = bus.subscribe();
        for _ in 0..5 {
            bus.publish(Event::Ping);
        }
        let received = sub.recv().await.unwrap();
        assert!(received.dropped > 0);
        assert_eq!(sub.drop_count(), received.dropped);
    }

    #[tokio::test]
    async fn test_index_event_sink_bridges_into_bus() {
        use crate::index::EventSink;
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        EventSink::emit(
            &bus,
            IndexEvent::FolderIndexing {
                folder_path: "docs".to_string(),
            },
        );
        let received = sub.recv().await.unwrap();
        assert!(matches!(received.event, Event::Index(IndexEvent::FolderIndexing { .. })));
    }

    #[tokio::test]
    async fn test_sync_event_sink_bridges_into_bus() {
        use crate::sync::SyncEventSink;
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        SyncEventSink::emit(
            &bus,
            SyncEvent::FolderSyncing {
                folder_path: "docs".to_string(),
            },
        );
        let received = sub.recv().await.unwrap();
        assert!(matches!(received.event, Event::Sync(SyncEvent::FolderSyncing { .. })));
    }
}
