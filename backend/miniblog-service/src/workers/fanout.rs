//! Feed fan-out.
//!
//! Events only carry ids. Every handler re-reads the post from the
//! authoritative store (never the cache) and writes through version-gated
//! upserts, so any event may be applied any number of times and in any order
//! and the feeds still converge on the latest post content.

use std::sync::Arc;

use event_queue::FeedEvent;
use tracing::debug;

use crate::db::{FeedStore, PostStore, SubscriptionGraph};
use crate::error::Result;
use crate::models::PostId;
use crate::pagination::PageRequest;

/// Page size used when copying an author's history into a new follower's feed.
pub const BACKFILL_PAGE_SIZE: u32 = 100;

pub struct FanoutWorker {
    posts: Arc<dyn PostStore>,
    subscriptions: Arc<dyn SubscriptionGraph>,
    feeds: Arc<dyn FeedStore>,
}

impl FanoutWorker {
    pub fn new(
        posts: Arc<dyn PostStore>,
        subscriptions: Arc<dyn SubscriptionGraph>,
        feeds: Arc<dyn FeedStore>,
    ) -> Self {
        Self {
            posts,
            subscriptions,
            feeds,
        }
    }

    /// Apply one event. Returns the number of feed rows written.
    pub async fn handle(&self, event: &FeedEvent) -> Result<u64> {
        match event {
            FeedEvent::PostCreated { post_id, author_id } => {
                self.post_created(PostId::from_uuid(*post_id), author_id)
                    .await
            }
            FeedEvent::PostPatched { post_id } => {
                self.post_patched(PostId::from_uuid(*post_id)).await
            }
            FeedEvent::SubscriptionCreated {
                follower_id,
                followed_id,
            } => self.backfill(follower_id, followed_id).await,
        }
    }

    async fn post_created(&self, post_id: PostId, author_id: &str) -> Result<u64> {
        let post = self.posts.get_post(post_id).await?;
        let subscribers = self.subscriptions.list_subscribers(author_id).await?;

        let written = self
            .feeds
            .upsert_for_subscribers(&subscribers, &post)
            .await?;

        debug!(
            post_id = %post_id,
            subscribers = subscribers.len(),
            written,
            "Fanned out new post"
        );
        Ok(written)
    }

    /// Upserts into every current subscriber's feed rather than only the
    /// existing copies: a `PostCreated` or backfill holding an older read may
    /// still be in flight, and its late write must find the newer row.
    async fn post_patched(&self, post_id: PostId) -> Result<u64> {
        let post = self.posts.get_post(post_id).await?;
        let subscribers = self.subscriptions.list_subscribers(&post.author_id).await?;

        let written = self
            .feeds
            .upsert_for_subscribers(&subscribers, &post)
            .await?;

        debug!(
            post_id = %post_id,
            version = post.version,
            subscribers = subscribers.len(),
            written,
            "Refreshed feed copies"
        );
        Ok(written)
    }

    /// Copy every post of `followed_id` into `follower_id`'s feed.
    async fn backfill(&self, follower_id: &str, followed_id: &str) -> Result<u64> {
        let mut request = PageRequest {
            cursor: None,
            size: BACKFILL_PAGE_SIZE,
        };
        let mut written = 0;
        let mut pages = 0;

        loop {
            let page = self
                .posts
                .list_posts_by_author(followed_id, &request)
                .await?;
            written += self.feeds.upsert_posts(follower_id, &page.items).await?;
            pages += 1;

            match page.next_cursor {
                Some(cursor) => request = request.after(cursor),
                None => break,
            }
        }

        debug!(follower_id, followed_id, pages, written, "Backfilled feed");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryFeedStore, InMemoryPostStore, InMemorySubscriptionGraph};
    use crate::models::Post;
    use crate::pagination::Page;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    /// Post store that parks the first armed read after it has loaded its
    /// result, until the test releases it.
    struct GatedStore {
        inner: Arc<InMemoryPostStore>,
        gate_get: AtomicBool,
        gate_list: AtomicBool,
        reached: Notify,
        release: Notify,
    }

    impl GatedStore {
        fn new(inner: Arc<InMemoryPostStore>) -> Self {
            Self {
                inner,
                gate_get: AtomicBool::new(false),
                gate_list: AtomicBool::new(false),
                reached: Notify::new(),
                release: Notify::new(),
            }
        }

        async fn park_if(&self, armed: &AtomicBool) {
            if armed.swap(false, Ordering::SeqCst) {
                self.reached.notify_one();
                self.release.notified().await;
            }
        }
    }

    #[async_trait]
    impl PostStore for GatedStore {
        async fn create_post(&self, author_id: &str, text: &str) -> Result<Post> {
            self.inner.create_post(author_id, text).await
        }

        async fn get_post(&self, id: PostId) -> Result<Post> {
            let post = self.inner.get_post(id).await?;
            self.park_if(&self.gate_get).await;
            Ok(post)
        }

        async fn patch_post(&self, id: PostId, author_id: &str, text: &str) -> Result<Post> {
            self.inner.patch_post(id, author_id, text).await
        }

        async fn list_posts_by_author(&self, author_id: &str, page: &PageRequest) -> Result<Page<Post>> {
            let posts = self.inner.list_posts_by_author(author_id, page).await?;
            self.park_if(&self.gate_list).await;
            Ok(posts)
        }
    }

    struct GatedFixture {
        posts: Arc<InMemoryPostStore>,
        gated: Arc<GatedStore>,
        graph: Arc<InMemorySubscriptionGraph>,
        feeds: Arc<InMemoryFeedStore>,
        worker: Arc<FanoutWorker>,
    }

    fn gated_fixture() -> GatedFixture {
        let posts = Arc::new(InMemoryPostStore::new());
        let gated = Arc::new(GatedStore::new(posts.clone()));
        let graph = Arc::new(InMemorySubscriptionGraph::new());
        let feeds = Arc::new(InMemoryFeedStore::new());
        let worker = Arc::new(FanoutWorker::new(gated.clone(), graph.clone(), feeds.clone()));
        GatedFixture {
            posts,
            gated,
            graph,
            feeds,
            worker,
        }
    }

    struct Fixture {
        posts: Arc<InMemoryPostStore>,
        graph: Arc<InMemorySubscriptionGraph>,
        feeds: Arc<InMemoryFeedStore>,
        worker: FanoutWorker,
    }

    fn fixture() -> Fixture {
        let posts = Arc::new(InMemoryPostStore::new());
        let graph = Arc::new(InMemorySubscriptionGraph::new());
        let feeds = Arc::new(InMemoryFeedStore::new());
        let worker = FanoutWorker::new(posts.clone(), graph.clone(), feeds.clone());
        Fixture {
            posts,
            graph,
            feeds,
            worker,
        }
    }

    #[tokio::test]
    async fn test_post_created_redelivery_is_idempotent() {
        let f = fixture();
        f.graph.subscribe("r1", "author").await.unwrap();
        f.graph.subscribe("r2", "author").await.unwrap();
        let post = f.posts.create_post("author", "hello").await.unwrap();

        let event = FeedEvent::PostCreated {
            post_id: post.id.as_uuid(),
            author_id: "author".to_string(),
        };
        assert_eq!(f.worker.handle(&event).await.unwrap(), 2);
        assert_eq!(f.worker.handle(&event).await.unwrap(), 0);

        assert_eq!(f.feeds.feed_len("r1").await, 1);
        assert_eq!(f.feeds.feed_len("r2").await, 1);
    }

    #[tokio::test]
    async fn test_patch_processed_before_create_converges() {
        let f = fixture();
        f.graph.subscribe("reader", "author").await.unwrap();
        let post = f.posts.create_post("author", "draft").await.unwrap();
        f.posts.patch_post(post.id, "author", "final").await.unwrap();

        // Reordered delivery: the patch arrives while no feed copy exists yet.
        let patched = FeedEvent::PostPatched {
            post_id: post.id.as_uuid(),
        };
        let created = FeedEvent::PostCreated {
            post_id: post.id.as_uuid(),
            author_id: "author".to_string(),
        };
        assert_eq!(f.worker.handle(&patched).await.unwrap(), 1);
        assert_eq!(f.worker.handle(&created).await.unwrap(), 0);

        let feed = f.feeds.get_feed("reader", &PageRequest::default()).await.unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].text, "final");
        assert_eq!(feed.items[0].version, 1);
    }

    #[tokio::test]
    async fn test_backfill_copies_whole_history() {
        let f = fixture();
        let mut ids = Vec::new();
        for i in 0..250 {
            let post = f.posts.create_post("author", &format!("post {}", i)).await.unwrap();
            ids.push(post.id);
        }
        f.posts.create_post("someone-else", "unrelated").await.unwrap();
        f.graph.subscribe("reader", "author").await.unwrap();

        let event = FeedEvent::SubscriptionCreated {
            follower_id: "reader".to_string(),
            followed_id: "author".to_string(),
        };
        assert_eq!(f.worker.handle(&event).await.unwrap(), 250);
        assert_eq!(f.feeds.feed_len("reader").await, 250);

        // Racing fan-out of an already backfilled post changes nothing.
        let created = FeedEvent::PostCreated {
            post_id: ids[0].as_uuid(),
            author_id: "author".to_string(),
        };
        assert_eq!(f.worker.handle(&created).await.unwrap(), 0);
        assert_eq!(f.feeds.feed_len("reader").await, 250);
    }

    #[tokio::test]
    async fn test_missing_post_is_an_error() {
        let f = fixture();
        let event = FeedEvent::PostPatched {
            post_id: uuid::Uuid::now_v7(),
        };
        assert!(f.worker.handle(&event).await.is_err());
    }

    #[tokio::test]
    async fn test_slow_create_racing_patch_converges() {
        let f = gated_fixture();
        f.graph.subscribe("reader", "author").await.unwrap();
        let post = f.posts.create_post("author", "v0").await.unwrap();

        // The create handler loads v0, then stalls before writing.
        f.gated.gate_get.store(true, Ordering::SeqCst);
        let worker = f.worker.clone();
        let created = FeedEvent::PostCreated {
            post_id: post.id.as_uuid(),
            author_id: "author".to_string(),
        };
        let slow = tokio::spawn(async move { worker.handle(&created).await });
        f.gated.reached.notified().await;

        f.posts.patch_post(post.id, "author", "v1").await.unwrap();
        let patched = FeedEvent::PostPatched {
            post_id: post.id.as_uuid(),
        };
        assert_eq!(f.worker.handle(&patched).await.unwrap(), 1);

        f.gated.release.notify_one();
        assert_eq!(slow.await.unwrap().unwrap(), 0);

        let feed = f.feeds.get_feed("reader", &PageRequest::default()).await.unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].text, "v1");
        assert_eq!(feed.items[0].version, 1);
    }

    #[tokio::test]
    async fn test_slow_backfill_racing_patch_converges() {
        let f = gated_fixture();
        let post = f.posts.create_post("author", "v0").await.unwrap();
        f.graph.subscribe("reader", "author").await.unwrap();

        // The backfill lists v0, then stalls before writing.
        f.gated.gate_list.store(true, Ordering::SeqCst);
        let worker = f.worker.clone();
        let backfill = FeedEvent::SubscriptionCreated {
            follower_id: "reader".to_string(),
            followed_id: "author".to_string(),
        };
        let slow = tokio::spawn(async move { worker.handle(&backfill).await });
        f.gated.reached.notified().await;

        f.posts.patch_post(post.id, "author", "v1").await.unwrap();
        let patched = FeedEvent::PostPatched {
            post_id: post.id.as_uuid(),
        };
        assert_eq!(f.worker.handle(&patched).await.unwrap(), 1);

        f.gated.release.notify_one();
        assert_eq!(slow.await.unwrap().unwrap(), 0);

        let feed = f.feeds.get_feed("reader", &PageRequest::default()).await.unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].text, "v1");
    }
}
