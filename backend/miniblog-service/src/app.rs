//! Composition root.
//!
//! Backends are chosen once from [`Config`] and handed to the services and
//! the fan-out worker as trait objects.

use std::sync::Arc;

use anyhow::{Context, Result};
use event_queue::{
    EventPublisher, EventSource, InMemoryQueue, KafkaEventPublisher, KafkaEventSource,
};
use post_cache::{CacheMetrics, InMemoryVersionedCache, RedisVersionedCache, VersionedCache};
use sqlx::postgres::PgPoolOptions;

use crate::cache::CachedPostStore;
use crate::config::{Config, StorageConfig};
use crate::db::{
    FeedStore, InMemoryFeedStore, InMemoryPostStore, InMemorySubscriptionGraph, PgFeedStore,
    PgPostStore, PgSubscriptionGraph, PostStore, SubscriptionGraph,
};
use crate::services::{FeedService, PostService, SubscriptionService};
use crate::workers::FanoutWorker;

#[derive(Clone)]
pub struct Backends {
    /// Authoritative store, never cached
    pub posts: Arc<dyn PostStore>,
    pub subscriptions: Arc<dyn SubscriptionGraph>,
    pub feeds: Arc<dyn FeedStore>,
    pub cache: Arc<dyn VersionedCache>,
    pub publisher: Arc<dyn EventPublisher>,
    /// Present when this process consumes feed events
    pub source: Option<Arc<dyn EventSource>>,
}

impl Backends {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let (posts, subscriptions, feeds): (
            Arc<dyn PostStore>,
            Arc<dyn SubscriptionGraph>,
            Arc<dyn FeedStore>,
        ) = match &config.storage {
            StorageConfig::InMemory => {
                tracing::info!("Using in-memory storage");
                (
                    Arc::new(InMemoryPostStore::new()),
                    Arc::new(InMemorySubscriptionGraph::new()),
                    Arc::new(InMemoryFeedStore::new()),
                )
            }
            StorageConfig::Postgres(db) => {
                let pool = PgPoolOptions::new()
                    .max_connections(db.max_connections)
                    .connect(&db.url)
                    .await
                    .context("Failed to connect to PostgreSQL")?;

                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .context("Failed to run database migrations")?;

                tracing::info!(max_connections = db.max_connections, "Using PostgreSQL storage");
                (
                    Arc::new(PgPostStore::new(pool.clone())),
                    Arc::new(PgSubscriptionGraph::new(pool.clone())),
                    Arc::new(PgFeedStore::new(pool)),
                )
            }
        };

        if let Err(e) = CacheMetrics::register(prometheus::default_registry()) {
            tracing::debug!("Cache metrics already registered: {}", e);
        }

        let cache: Arc<dyn VersionedCache> = match &config.redis {
            Some(redis) => {
                let cache = RedisVersionedCache::connect(&redis.url)
                    .await
                    .context("Failed to connect to Redis")?;
                tracing::info!("Using Redis post cache");
                Arc::new(cache)
            }
            None => {
                tracing::info!("Using in-process post cache");
                Arc::new(InMemoryVersionedCache::new())
            }
        };

        let (publisher, source): (Arc<dyn EventPublisher>, Option<Arc<dyn EventSource>>) =
            match &config.kafka {
                Some(kafka) => {
                    let publisher = KafkaEventPublisher::new(kafka)
                        .context("Failed to create Kafka producer")?;
                    let source: Option<Arc<dyn EventSource>> = if config.app.role.runs_worker() {
                        Some(Arc::new(
                            KafkaEventSource::new(kafka)
                                .context("Failed to create Kafka consumer")?,
                        ))
                    } else {
                        None
                    };
                    tracing::info!(topic = %kafka.topic, "Using Kafka event queue");
                    (Arc::new(publisher), source)
                }
                None => {
                    tracing::info!("Using in-process event queue");
                    let queue = InMemoryQueue::new();
                    (Arc::new(queue.clone()), Some(Arc::new(queue)))
                }
            };

        Ok(Self {
            posts,
            subscriptions,
            feeds,
            cache,
            publisher,
            source,
        })
    }

    /// Everything in process, sharing `queue` for publishing and consuming.
    pub fn in_memory(queue: InMemoryQueue) -> Self {
        Self {
            posts: Arc::new(InMemoryPostStore::new()),
            subscriptions: Arc::new(InMemorySubscriptionGraph::new()),
            feeds: Arc::new(InMemoryFeedStore::new()),
            cache: Arc::new(InMemoryVersionedCache::new()),
            publisher: Arc::new(queue.clone()),
            source: Some(Arc::new(queue)),
        }
    }

    pub fn post_service(&self) -> PostService {
        let cached = CachedPostStore::new(self.posts.clone(), self.cache.clone());
        PostService::new(Arc::new(cached), self.publisher.clone())
    }

    pub fn subscription_service(&self) -> SubscriptionService {
        SubscriptionService::new(self.subscriptions.clone(), self.publisher.clone())
    }

    pub fn feed_service(&self) -> FeedService {
        FeedService::new(self.feeds.clone())
    }

    /// Fan-out reads the authoritative store directly.
    pub fn fanout_worker(&self) -> FanoutWorker {
        FanoutWorker::new(
            self.posts.clone(),
            self.subscriptions.clone(),
            self.feeds.clone(),
        )
    }
}
