/// Subscription service - follow edges and feed backfill scheduling
use std::sync::Arc;

use event_queue::{EventEnvelope, EventPublisher, FeedEvent};

use crate::db::SubscriptionGraph;
use crate::error::{AppError, Result};

pub struct SubscriptionService {
    graph: Arc<dyn SubscriptionGraph>,
    publisher: Arc<dyn EventPublisher>,
}

impl SubscriptionService {
    pub fn new(graph: Arc<dyn SubscriptionGraph>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { graph, publisher }
    }

    /// Make `follower_id` follow `followed_id` and schedule a backfill of the
    /// follower's feed.
    ///
    /// The backfill event is published even when the edge already existed, so
    /// a client retrying after a failed publish still gets its feed filled.
    pub async fn subscribe(&self, follower_id: &str, followed_id: &str) -> Result<()> {
        let created = self.graph.subscribe(follower_id, followed_id).await?;

        let envelope = EventEnvelope::new(FeedEvent::SubscriptionCreated {
            follower_id: follower_id.to_string(),
            followed_id: followed_id.to_string(),
        });

        if let Err(err) = self.publisher.publish(&envelope).await {
            tracing::error!(
                follower_id,
                followed_id,
                event_id = %envelope.event_id,
                error = %err,
                "Failed to publish subscription event after commit"
            );
            return Err(AppError::from(err));
        }

        tracing::info!(follower_id, followed_id, created, "Subscription stored");
        Ok(())
    }

    pub async fn list_subscribers(&self, user_id: &str) -> Result<Vec<String>> {
        self.graph.list_subscribers(user_id).await
    }

    pub async fn list_followed(&self, user_id: &str) -> Result<Vec<String>> {
        self.graph.list_followed(user_id).await
    }
}
