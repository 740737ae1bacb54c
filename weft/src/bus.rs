//! In-process pub/sub bus: named topics over tokio broadcast channels.
//!
//! Used for the `trigger_cycle` signal that forces an immediate sync pass and
//! for fanning download progress out to subscribers. Publishing clones the
//! topic's sender out of the map first, so no map lock is held while sending;
//! subscriber channels are buffered and slow subscribers lag rather than
//! block the publisher.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

/// Topic that forces an immediate sync/download pass when published to.
pub const TOPIC_TRIGGER_CYCLE: &str = "trigger_cycle";
/// Topic carrying download progress updates.
pub const TOPIC_DOWNLOAD_PROGRESS: &str = "model_download_progress";

const TOPIC_CAPACITY: usize = 64;

/// Topic bus. Cheap to clone via `Arc` by callers; topics are created lazily
/// on first publish or subscribe.
#[derive(Default)]
pub struct PubSub {
    topics: DashMap<String, broadcast::Sender<Value>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Value> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Publishes `payload` to `topic`. Returns the number of subscribers that
    /// received it; zero when nobody is listening (not an error).
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        let tx = self.sender(topic);
        // The guard from the map lookup is dropped before send.
        tx.send(payload).unwrap_or(0)
    }

    /// Subscribes to `topic`. Messages published after this call are
    /// delivered; a lagging receiver drops the oldest messages.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        self.sender(topic).subscribe()
    }

    /// Publishes an empty object, for signal-only topics like `trigger_cycle`.
    pub fn signal(&self, topic: &str) -> usize {
        self.publish(topic, Value::Object(serde_json::Map::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: publish before any subscriber reports zero receivers and does not error.
    #[tokio::test]
    async fn publish_without_subscribers() {
        let bus = PubSub::new();
        assert_eq!(bus.publish("t", serde_json::json!({"n": 1})), 0);
    }

    /// **Scenario**: two subscribers both receive a published message.
    #[tokio::test]
    async fn fan_out_to_subscribers() {
        let bus = PubSub::new();
        let mut a = bus.subscribe(TOPIC_DOWNLOAD_PROGRESS);
        let mut b = bus.subscribe(TOPIC_DOWNLOAD_PROGRESS);
        assert_eq!(
            bus.publish(TOPIC_DOWNLOAD_PROGRESS, serde_json::json!({"pct": 50})),
            2
        );
        assert_eq!(a.recv().await.unwrap()["pct"], 50);
        assert_eq!(b.recv().await.unwrap()["pct"], 50);
    }

    /// **Scenario**: topics are independent.
    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = PubSub::new();
        let mut cycle = bus.subscribe(TOPIC_TRIGGER_CYCLE);
        bus.publish("other", serde_json::json!({}));
        assert!(cycle.try_recv().is_err());
        bus.signal(TOPIC_TRIGGER_CYCLE);
        assert!(cycle.recv().await.is_ok());
    }
}
