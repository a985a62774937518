//! # Feed Event Queue
//!
//! Decouples the write path (post creation, post edits, subscriptions) from the
//! fan-out worker that materializes subscriber feeds.
//!
//! ## Delivery contract
//!
//! - **At-least-once**: an event may be delivered more than once, including
//!   after it was fully processed (crash before acknowledgement, rebalances).
//! - **Unordered**: no ordering is guaranteed across events, not even for
//!   events that concern the same post.
//! - **Acknowledge after apply**: a consumer calls [`EventSource::ack`] only
//!   once its side effects are durable. [`EventSource::nack`] hands the
//!   delivery back for redelivery.
//!
//! Consumers must therefore be idempotent by construction, e.g. by upserting
//! on a natural key and by always reading current authoritative state instead
//! of trusting data carried inside the event.
//!
//! ```text
//! writer ──publish──▶ EventPublisher ──▶ broker ──▶ EventSource ──recv──▶ worker
//!                                                      ▲                    │
//!                                                      └──── ack / nack ────┘
//! ```
//!
//! ## Backends
//!
//! - [`InMemoryQueue`]: single-process channel, used for development and tests
//! - [`KafkaEventPublisher`] / [`KafkaEventSource`]: Kafka topic with manual
//!   offset commits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod error;
mod kafka;
mod memory;

pub use error::{QueueError, QueueResult};
pub use kafka::{KafkaEventPublisher, KafkaEventSource, KafkaQueueConfig, OffsetTracker};
pub use memory::InMemoryQueue;

/// Events consumed by the feed fan-out worker.
///
/// Events carry identifiers only. Post content is always re-read from the
/// post store by the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A post was created and must be copied into every subscriber's feed.
    #[serde(rename_all = "camelCase")]
    PostCreated { post_id: Uuid, author_id: String },

    /// A post was edited and existing feed copies must be refreshed.
    #[serde(rename_all = "camelCase")]
    PostPatched { post_id: Uuid },

    /// A subscription edge was created and the follower's feed must be
    /// backfilled with the followed author's history.
    #[serde(rename_all = "camelCase")]
    SubscriptionCreated {
        follower_id: String,
        followed_id: String,
    },
}

impl FeedEvent {
    /// Fully qualified event type (e.g., "feed.post.created")
    pub fn event_type(&self) -> &'static str {
        match self {
            FeedEvent::PostCreated { .. } => "feed.post.created",
            FeedEvent::PostPatched { .. } => "feed.post.patched",
            FeedEvent::SubscriptionCreated { .. } => "feed.subscription.created",
        }
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedEvent::PostCreated { .. } => "post_created",
            FeedEvent::PostPatched { .. } => "post_patched",
            FeedEvent::SubscriptionCreated { .. } => "subscription_created",
        }
    }

    /// Partition key: events about the same aggregate share a key.
    pub fn aggregate_key(&self) -> String {
        match self {
            FeedEvent::PostCreated { post_id, .. } | FeedEvent::PostPatched { post_id } => {
                post_id.to_string()
            }
            FeedEvent::SubscriptionCreated { follower_id, .. } => follower_id.clone(),
        }
    }
}

/// Wire envelope for a [`FeedEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this publication
    pub event_id: Uuid,

    /// Timestamp when the event was produced
    pub occurred_at: DateTime<Utc>,

    pub event: FeedEvent,
}

impl EventEnvelope {
    pub fn new(event: FeedEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event,
        }
    }
}

/// Backend bookkeeping needed to acknowledge a delivery.
#[derive(Debug, Clone)]
pub(crate) enum Receipt {
    Memory,
    Kafka {
        topic: String,
        partition: i32,
        offset: i64,
    },
}

/// One delivery of an event to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: EventEnvelope,

    /// Number of earlier deliveries of this event that were handed back with
    /// `nack` (0 on first delivery).
    pub attempt: u32,

    pub(crate) receipt: Receipt,
}

impl Delivery {
    pub fn event(&self) -> &FeedEvent {
        &self.envelope.event
    }
}

/// Producer side of the queue.
///
/// Publishing is fire-and-forget for the caller: it returns once the broker
/// accepted the event, not when the event has been consumed.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> QueueResult<()>;
}

/// Consumer side of the queue.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Wait for the next delivery.
    ///
    /// Returns [`QueueError::Closed`] once no further deliveries can arrive.
    async fn recv(&self) -> QueueResult<Delivery>;

    /// Confirm that the delivery has been applied. It will not be redelivered.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Hand the delivery back so it is delivered again later.
    async fn nack(&self, delivery: Delivery) -> QueueResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_created_wire_format() {
        let post_id = Uuid::parse_str("018f3c1e-7b5a-7c1d-9a2b-3c4d5e6f7a8b").unwrap();
        let event = FeedEvent::PostCreated {
            post_id,
            author_id: "12345".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "post_created");
        assert_eq!(json["postId"], "018f3c1e-7b5a-7c1d-9a2b-3c4d5e6f7a8b");
        assert_eq!(json["authorId"], "12345");
    }

    #[test]
    fn test_subscription_created_deserialize() {
        let json = r#"{
            "type": "subscription_created",
            "followerId": "a",
            "followedId": "b"
        }"#;

        let event: FeedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            FeedEvent::SubscriptionCreated {
                follower_id: "a".to_string(),
                followed_id: "b".to_string(),
            }
        );
        assert_eq!(event.event_type(), "feed.subscription.created");
        assert_eq!(event.aggregate_key(), "a");
    }

    #[test]
    fn test_envelope_survives_json() {
        let envelope = EventEnvelope::new(FeedEvent::PostPatched {
            post_id: Uuid::new_v4(),
        });
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded: EventEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }
}
