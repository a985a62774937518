//! Kafka queue backend.
//!
//! Publisher uses an idempotent `FutureProducer`. The consumer disables
//! auto-commit and commits through an [`OffsetTracker`] so that several
//! worker tasks sharing one consumer never commit past an event that is still
//! being processed.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::{Delivery, EventEnvelope, EventPublisher, EventSource, QueueError, QueueResult, Receipt};

/// Connection settings shared by the publisher and the consumer.
#[derive(Debug, Clone)]
pub struct KafkaQueueConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

impl KafkaQueueConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` when `KAFKA_BROKERS` is unset or blank.
    pub fn from_env() -> Option<Self> {
        let brokers = std::env::var("KAFKA_BROKERS").ok()?;

        if brokers.trim().is_empty() {
            return None;
        }

        Some(Self {
            brokers,
            topic: std::env::var("KAFKA_FEED_EVENTS_TOPIC")
                .unwrap_or_else(|_| "miniblog.feed.events".to_string()),
            group_id: std::env::var("KAFKA_GROUP_ID")
                .unwrap_or_else(|_| "miniblog-fanout-worker".to_string()),
        })
    }
}

/// Publishes feed events to a single Kafka topic.
///
/// Messages are keyed by [`crate::FeedEvent::aggregate_key`] and carry the
/// event metadata in headers.
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
    delivery_timeout: Duration,
}

impl KafkaEventPublisher {
    pub fn new(config: &KafkaQueueConfig) -> QueueResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("message.timeout.ms", "30000")
            .create()?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            delivery_timeout: Duration::from_secs(30),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> QueueResult<()> {
        let payload = serde_json::to_vec(envelope)?;
        let key = envelope.event.aggregate_key();
        let event_id = envelope.event_id.to_string();
        let occurred_at = envelope.occurred_at.to_rfc3339();
        let event_type = envelope.event.event_type();

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "event_type",
                value: Some(event_type.as_bytes()),
            })
            .insert(Header {
                key: "event_id",
                value: Some(event_id.as_bytes()),
            })
            .insert(Header {
                key: "occurred_at",
                value: Some(occurred_at.as_bytes()),
            });

        let record = FutureRecord::to(&self.topic)
            .key(&key)
            .payload(&payload)
            .headers(headers);

        let (partition, offset) = self
            .producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(err, _)| QueueError::PublishFailed(format!("Kafka publish failed: {}", err)))?;

        debug!(
            event_id = %envelope.event_id,
            event_type,
            topic = %self.topic,
            partition,
            offset,
            "Event published to Kafka"
        );

        Ok(())
    }
}

#[derive(Debug, Default)]
struct PartitionOffsets {
    /// Offset -> number of outstanding deliveries of that offset.
    in_flight: BTreeMap<i64, usize>,
    highest_seen: Option<i64>,
    committed: Option<i64>,
}

/// Computes safe commit positions for partitions consumed concurrently.
///
/// A partition's commit position is the lowest offset still in flight, or one
/// past the highest offset seen once nothing is in flight. Positions never
/// move backwards.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `offset` was handed to a consumer task.
    pub fn begin(&mut self, topic: &str, partition: i32, offset: i64) {
        let state = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        *state.in_flight.entry(offset).or_insert(0) += 1;
        state.highest_seen = Some(state.highest_seen.map_or(offset, |h| h.max(offset)));
    }

    /// Record that `offset` finished. Returns the new commit position when it
    /// advanced.
    pub fn complete(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;

        if let Some(count) = state.in_flight.get_mut(&offset) {
            *count -= 1;
            if *count == 0 {
                state.in_flight.remove(&offset);
            }
        }

        let position = match state.in_flight.keys().next() {
            Some(lowest) => *lowest,
            None => state.highest_seen? + 1,
        };

        if state.committed.map_or(true, |c| position > c) {
            state.committed = Some(position);
            Some(position)
        } else {
            None
        }
    }

    /// Number of deliveries not yet completed on a partition.
    pub fn in_flight(&self, topic: &str, partition: i32) -> usize {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, |s| s.in_flight.values().sum())
    }
}

/// Consumes feed events from Kafka with manual offset management.
pub struct KafkaEventSource {
    consumer: StreamConsumer,
    tracker: Mutex<OffsetTracker>,
    retries: Mutex<VecDeque<Delivery>>,
    retry_ready: Notify,
}

impl KafkaEventSource {
    pub fn new(config: &KafkaQueueConfig) -> QueueResult<Self> {
        info!(
            "Starting feed events consumer (topic: {}, group: {})",
            config.topic, config.group_id
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .create()?;

        consumer.subscribe(&[&config.topic])?;

        Ok(Self {
            consumer,
            tracker: Mutex::new(OffsetTracker::new()),
            retries: Mutex::new(VecDeque::new()),
            retry_ready: Notify::new(),
        })
    }

    fn pop_retry(&self) -> Option<Delivery> {
        self.retries.lock().ok()?.pop_front()
    }

    fn complete(&self, topic: &str, partition: i32, offset: i64) -> QueueResult<()> {
        let position = {
            let mut tracker = self
                .tracker
                .lock()
                .map_err(|_| QueueError::PublishFailed("offset tracker lock poisoned".to_string()))?;
            tracker.complete(topic, partition, offset)
        };

        if let Some(position) = position {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(topic, partition, Offset::Offset(position))?;
            self.consumer.commit(&tpl, CommitMode::Async)?;
            debug!(topic, partition, offset = position, "Committed Kafka offset");
        }

        Ok(())
    }

    /// Turn a raw message into a delivery. Messages that cannot be decoded
    /// are committed past and `None` is returned.
    fn accept(&self, message: &BorrowedMessage<'_>) -> QueueResult<Option<Delivery>> {
        let topic = message.topic().to_string();
        let partition = message.partition();
        let offset = message.offset();

        if let Ok(mut tracker) = self.tracker.lock() {
            tracker.begin(&topic, partition, offset);
        }

        let decoded = match message.payload() {
            Some(data) => serde_json::from_slice::<EventEnvelope>(data).map_err(QueueError::from),
            None => Err(QueueError::PublishFailed("empty payload".to_string())),
        };

        match decoded {
            Ok(envelope) => Ok(Some(Delivery {
                envelope,
                attempt: 0,
                receipt: Receipt::Kafka {
                    topic,
                    partition,
                    offset,
                },
            })),
            Err(e) => {
                error!(
                    topic = %topic,
                    partition,
                    offset,
                    event_type = ?header_value(message, "event_type"),
                    error = %e,
                    "Skipping undecodable feed event"
                );
                self.complete(&topic, partition, offset)?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn recv(&self) -> QueueResult<Delivery> {
        loop {
            if let Some(delivery) = self.pop_retry() {
                return Ok(delivery);
            }

            let retry_ready = self.retry_ready.notified();

            tokio::select! {
                _ = retry_ready => continue,
                received = self.consumer.recv() => match received {
                    Ok(message) => {
                        if let Some(delivery) = self.accept(&message)? {
                            return Ok(delivery);
                        }
                    }
                    Err(err) => {
                        error!("Kafka error: {}", err);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        match &delivery.receipt {
            Receipt::Kafka {
                topic,
                partition,
                offset,
            } => self.complete(topic, *partition, *offset),
            Receipt::Memory => {
                warn!(event_id = %delivery.envelope.event_id, "Ack for a delivery from another queue");
                Ok(())
            }
        }
    }

    async fn nack(&self, mut delivery: Delivery) -> QueueResult<()> {
        delivery.attempt += 1;
        self.retries
            .lock()
            .map_err(|_| QueueError::PublishFailed("retry buffer lock poisoned".to_string()))?
            .push_back(delivery);
        self.retry_ready.notify_one();
        Ok(())
    }
}

fn header_value<'a>(message: &'a BorrowedMessage<'a>, key: &str) -> Option<&'a str> {
    message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == key)
                .and_then(|header| header.value)
        })
        .and_then(|value| std::str::from_utf8(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_waits_for_lowest_in_flight() {
        let mut tracker = OffsetTracker::new();
        tracker.begin("t", 0, 10);
        tracker.begin("t", 0, 11);
        tracker.begin("t", 0, 12);

        // 11 and 12 finish first; 10 still blocks the commit position.
        assert_eq!(tracker.complete("t", 0, 12), Some(10));
        assert_eq!(tracker.complete("t", 0, 11), None);
        assert_eq!(tracker.in_flight("t", 0), 1);

        assert_eq!(tracker.complete("t", 0, 10), Some(13));
        assert_eq!(tracker.in_flight("t", 0), 0);
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut tracker = OffsetTracker::new();
        tracker.begin("t", 0, 5);
        tracker.begin("t", 1, 7);

        assert_eq!(tracker.complete("t", 1, 7), Some(8));
        assert_eq!(tracker.in_flight("t", 0), 1);
        assert_eq!(tracker.complete("t", 0, 5), Some(6));
    }

    #[test]
    fn test_redelivered_offset_counts_twice() {
        let mut tracker = OffsetTracker::new();
        tracker.begin("t", 0, 3);
        tracker.begin("t", 0, 3);

        assert_eq!(tracker.complete("t", 0, 3), Some(3));
        assert_eq!(tracker.complete("t", 0, 3), Some(4));
    }

    #[test]
    fn test_unknown_partition() {
        let mut tracker = OffsetTracker::new();
        assert_eq!(tracker.complete("t", 9, 1), None);
    }
}
