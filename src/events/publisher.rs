//! # Lifecycle Event Publisher
//!
//! Broadcasts job, content list and edition task lifecycle events to in-process
//! subscribers. Publishing never fails because nobody is listening; lagging
//! subscribers lose the oldest events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::constants::DEFAULT_EVENT_CAPACITY;

/// High-throughput event publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
    published: Arc<AtomicU64>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event_id: Uuid,
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventPublisherStats {
    pub published: u64,
    pub subscribers: usize,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event with the given name and context
    pub async fn publish(
        &self,
        event_name: impl Into<String>,
        context: Value,
    ) -> Result<(), PublishError> {
        let event = PublishedEvent {
            event_id: Uuid::new_v4(),
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };
        self.published.fetch_add(1, Ordering::Relaxed);

        // A send error only means there are no subscribers right now
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Serialize `payload` and publish it
    pub async fn publish_payload<T: Serialize>(
        &self,
        event_name: impl Into<String>,
        payload: &T,
    ) -> Result<(), PublishError> {
        let context = serde_json::to_value(payload)?;
        self.publish(event_name, context).await
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            published: self.published.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::events;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let publisher = EventPublisher::new(4);
        publisher
            .publish(events::JOB_STARTED, json!({"job_id": 1}))
            .await
            .unwrap();
        assert_eq!(publisher.stats().published, 1);
        assert_eq!(publisher.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let publisher = EventPublisher::default();
        let mut receiver = publisher.subscribe();

        publisher
            .publish(events::JOB_STARTED, json!({"job_id": 1}))
            .await
            .unwrap();
        publisher
            .publish(events::JOB_FINISHED, json!({"job_id": 1}))
            .await
            .unwrap();

        assert_eq!(receiver.recv().await.unwrap().name, events::JOB_STARTED);
        let finished = receiver.recv().await.unwrap();
        assert_eq!(finished.name, events::JOB_FINISHED);
        assert_eq!(finished.context["job_id"], 1);
    }
}
