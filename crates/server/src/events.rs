//! Realtime broadcast of poll state changes.
//!
//! A single `tokio::sync::broadcast` channel carries every event to every
//! subscriber. Publishing never blocks: a subscriber that falls more than the
//! channel capacity behind skips the oldest events, and publishing with no
//! subscribers is not an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use quickpoll_core::{PollChanges, PollId, PollResults, PollType, PollView, VoteId};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCreated {
    pub poll_id: PollId,
    pub title: String,
    #[serde(rename = "type")]
    pub poll_type: PollType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSubmitted {
    pub vote_id: VoteId,
    pub total_votes: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsUpdated {
    pub poll: PollView,
    pub results: PollResults,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUpdated {
    pub poll_id: PollId,
    pub changes: PollChanges,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDeleted {
    pub poll_id: PollId,
}

/// A state change pushed to every connected viewer.
///
/// Serializes as the bare payload; the event name travels separately.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PollEvent {
    PollCreated(PollCreated),
    VoteSubmitted(VoteSubmitted),
    ResultsUpdated(Box<ResultsUpdated>),
    PollUpdated(PollUpdated),
    PollDeleted(PollDeleted),
}

impl PollEvent {
    /// Event name as seen by clients.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PollCreated(_) => "pollCreated",
            Self::VoteSubmitted(_) => "voteSubmitted",
            Self::ResultsUpdated(_) => "resultsUpdated",
            Self::PollUpdated(_) => "pollUpdated",
            Self::PollDeleted(_) => "pollDeleted",
        }
    }
}

/// Fan-out hub for [`PollEvent`]s. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<PollEvent>>,
    connections: Arc<AtomicUsize>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per subscriber.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, event: PollEvent) -> usize {
        let name = event.name();
        // send() returns Err if there are no receivers, which is fine.
        let delivered = self.sender.send(Arc::new(event)).unwrap_or(0);
        debug!(event = name, subscribers = delivered, "Published poll event");
        delivered
    }

    /// Join the broadcast. The connection count drops when the returned
    /// subscription is dropped.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let count = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(connections = count, "Event subscriber joined");

        Subscription {
            receiver: self.sender.subscribe(),
            _guard: ConnectionGuard {
                connections: Arc::clone(&self.connections),
            },
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// One subscriber's view of the bus.
pub struct Subscription {
    receiver: broadcast::Receiver<Arc<PollEvent>>,
    _guard: ConnectionGuard,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<PollEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, skipping events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

struct ConnectionGuard {
    connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self
            .connections
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        debug!(connections = remaining, "Event subscriber left");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn deleted() -> PollEvent {
        PollEvent::PollDeleted(PollDeleted {
            poll_id: PollId::generate(),
        })
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        assert_eq!(bus.publish(deleted()), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_events_in_order() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let vote_id = VoteId::generate();
        bus.publish(PollEvent::VoteSubmitted(VoteSubmitted {
            vote_id,
            total_votes: 1,
            timestamp: Utc::now(),
        }));
        bus.publish(deleted());

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await.unwrap().name(), "voteSubmitted");
            assert_eq!(sub.recv().await.unwrap().name(), "pollDeleted");
        }
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_oldest() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for _ in 0..3 {
            bus.publish(deleted());
        }
        bus.publish(PollEvent::PollCreated(PollCreated {
            poll_id: PollId::generate(),
            title: "Latest".to_string(),
            poll_type: PollType::Simple,
        }));

        assert_eq!(sub.recv().await.unwrap().name(), "pollDeleted");
        assert_eq!(sub.recv().await.unwrap().name(), "pollCreated");
    }

    #[test]
    fn test_connection_count() {
        let bus = EventBus::new(4);
        let a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.connection_count(), 2);
        drop(a);
        assert_eq!(bus.connection_count(), 1);
        drop(b);
        assert_eq!(bus.connection_count(), 0);
    }

    #[test]
    fn test_payload_serialization() {
        let poll_id = PollId::generate();
        let event = PollEvent::PollCreated(PollCreated {
            poll_id,
            title: "Lunch".to_string(),
            poll_type: PollType::Rating,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["pollId"], poll_id.to_string());
        assert_eq!(json["type"], "rating");
        assert!(json.get("PollCreated").is_none());
    }
}
