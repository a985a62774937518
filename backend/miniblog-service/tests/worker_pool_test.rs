//! Worker pool delivery semantics over the in-process queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_queue::{EventEnvelope, EventPublisher, FeedEvent, InMemoryQueue};
use miniblog_service::db::{
    FeedStore, InMemoryFeedStore, InMemoryPostStore, InMemorySubscriptionGraph, PostStore,
    SubscriptionGraph,
};
use miniblog_service::error::{AppError, Result};
use miniblog_service::models::{FeedItem, Post};
use miniblog_service::pagination::{Page, PageRequest};
use miniblog_service::workers::{FanoutWorker, WorkerPool};
use tokio::sync::watch;

/// Feed store whose first `failures` writes fail.
struct FlakyFeedStore {
    inner: InMemoryFeedStore,
    failures: AtomicUsize,
}

impl FlakyFeedStore {
    fn check(&self) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::Database("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedStore for FlakyFeedStore {
    async fn upsert_for_subscribers(&self, subscriber_ids: &[String], post: &Post) -> Result<u64> {
        self.check()?;
        self.inner.upsert_for_subscribers(subscriber_ids, post).await
    }

    async fn upsert_posts(&self, subscriber_id: &str, posts: &[Post]) -> Result<u64> {
        self.check()?;
        self.inner.upsert_posts(subscriber_id, posts).await
    }

    async fn get_feed(&self, subscriber_id: &str, page: &PageRequest) -> Result<Page<FeedItem>> {
        self.inner.get_feed(subscriber_id, page).await
    }
}

#[tokio::test]
async fn test_failed_event_is_redelivered_until_applied() {
    let queue = InMemoryQueue::new();
    let posts = Arc::new(InMemoryPostStore::new());
    let graph = Arc::new(InMemorySubscriptionGraph::new());
    let feeds = Arc::new(FlakyFeedStore {
        inner: InMemoryFeedStore::new(),
        failures: AtomicUsize::new(1),
    });
    let worker = Arc::new(FanoutWorker::new(posts.clone(), graph.clone(), feeds.clone()));

    graph.subscribe("reader", "author").await.unwrap();
    let post = posts.create_post("author", "hello").await.unwrap();
    queue
        .publish(&EventEnvelope::new(FeedEvent::PostCreated {
            post_id: post.id.as_uuid(),
            author_id: "author".to_string(),
        }))
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = WorkerPool::new(Arc::new(queue.clone()), worker, 1, Duration::from_secs(5));
    let handle = tokio::spawn(pool.run(shutdown_rx));

    // First attempt fails, the retry lands after a one second backoff.
    tokio::time::timeout(Duration::from_secs(10), queue.wait_idle())
        .await
        .expect("event should eventually be applied");
    assert_eq!(feeds.inner.feed_len("reader").await, 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pool should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_pool_stops_when_source_closes() {
    let queue = InMemoryQueue::new();
    let worker = Arc::new(FanoutWorker::new(
        Arc::new(InMemoryPostStore::new()),
        Arc::new(InMemorySubscriptionGraph::new()),
        Arc::new(InMemoryFeedStore::new()),
    ));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = WorkerPool::new(Arc::new(queue.clone()), worker, 3, Duration::from_secs(5));
    let handle = tokio::spawn(pool.run(shutdown_rx));

    queue.close();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pool should stop once the queue is closed")
        .unwrap();
}
