//! Error types for the event queue library.

use thiserror::Error;

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while publishing or consuming events.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Failed to hand an event to the broker
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Broker client error
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The queue has been shut down and no more deliveries will arrive
    #[error("Queue closed")]
    Closed,
}
