//! Broadcast channel for fine-grained progress events.
//!
//! Subscribers come and go; events published with no subscriber are dropped.
//! Slow subscribers lose the oldest events rather than blocking publishers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const BUS_CAPACITY: usize = 256;

/// Per-step progress notification, finer grained than the task counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// One account finished collecting
    Collect { message: String, count: usize },
    /// A document finished generating
    Download {
        article_id: i64,
        title: String,
        current: usize,
        total: usize,
    },
    /// One article finished rewriting
    Rewrite {
        title: String,
        current: usize,
        total: usize,
    },
}

/// Fan-out hub for [`ProgressEvent`]s
#[derive(Clone)]
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publish an event. A send error only means nobody is listening.
    pub fn publish(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            debug!("Progress event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ProgressEvent::Rewrite {
            title: "t".to_string(),
            current: 1,
            total: 3,
        });

        match rx.recv().await.unwrap() {
            ProgressEvent::Rewrite { current, total, .. } => {
                assert_eq!((current, total), (1, 3));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = ProgressBus::new();
        bus.publish(ProgressEvent::Collect {
            message: "done".to_string(),
            count: 2,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_get_events() {
        let bus = ProgressBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(ProgressEvent::Download {
            article_id: 7,
            title: "t".to_string(),
            current: 1,
            total: 1,
        });

        assert!(matches!(a.recv().await.unwrap(), ProgressEvent::Download { article_id: 7, .. }));
        assert!(matches!(b.recv().await.unwrap(), ProgressEvent::Download { article_id: 7, .. }));
    }
}
