//! In-process stores for development and tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{ensure_not_self, post_not_found, FeedStore, PostStore, SubscriptionGraph};
use crate::error::{AppError, Result};
use crate::models::{FeedItem, IdGenerator, Post, PostId};
use crate::pagination::{paginate, Page, PageRequest};

/// Newest-first scan of `items` starting at the request cursor.
fn page_of<T: Clone>(
    items: &BTreeMap<PostId, T>,
    page: &PageRequest,
    keep: impl Fn(&T) -> bool,
) -> Vec<T> {
    let upper = match page.cursor {
        Some(cursor) => Bound::Included(cursor),
        None => Bound::Unbounded,
    };

    items
        .range((Bound::Unbounded, upper))
        .rev()
        .map(|(_, item)| item)
        .filter(|item| keep(item))
        .take(page.fetch_limit() as usize)
        .cloned()
        .collect()
}

#[derive(Default)]
pub struct InMemoryPostStore {
    posts: RwLock<BTreeMap<PostId, Post>>,
    ids: IdGenerator,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn create_post(&self, author_id: &str, text: &str) -> Result<Post> {
        let mut posts = self.posts.write().await;
        let now = Utc::now();
        let post = Post {
            id: self.ids.next_id(),
            author_id: author_id.to_string(),
            text: text.to_string(),
            created_at: now,
            last_modified_at: now,
            version: 0,
        };
        posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn get_post(&self, id: PostId) -> Result<Post> {
        self.posts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| post_not_found(id))
    }

    async fn patch_post(&self, id: PostId, author_id: &str, text: &str) -> Result<Post> {
        let mut posts = self.posts.write().await;
        let post = posts.get_mut(&id).ok_or_else(|| post_not_found(id))?;

        if post.author_id != author_id {
            return Err(AppError::Forbidden(format!(
                "post {} belongs to another author",
                id
            )));
        }

        post.text = text.to_string();
        post.last_modified_at = Utc::now().max(post.created_at);
        post.version += 1;
        Ok(post.clone())
    }

    async fn list_posts_by_author(&self, author_id: &str, page: &PageRequest) -> Result<Page<Post>> {
        let rows = {
            let posts = self.posts.read().await;
            page_of(&posts, page, |post| post.author_id == author_id)
        };
        paginate(page, rows)
    }
}

#[derive(Default)]
struct Edges {
    /// followed -> followers
    subscribers: HashMap<String, BTreeSet<String>>,
    /// follower -> followed
    followed: HashMap<String, BTreeSet<String>>,
}

#[derive(Default)]
pub struct InMemorySubscriptionGraph {
    edges: RwLock<Edges>,
}

impl InMemorySubscriptionGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionGraph for InMemorySubscriptionGraph {
    async fn subscribe(&self, follower_id: &str, followed_id: &str) -> Result<bool> {
        ensure_not_self(follower_id, followed_id)?;

        let mut edges = self.edges.write().await;
        let created = edges
            .subscribers
            .entry(followed_id.to_string())
            .or_default()
            .insert(follower_id.to_string());
        edges
            .followed
            .entry(follower_id.to_string())
            .or_default()
            .insert(followed_id.to_string());
        Ok(created)
    }

    async fn list_subscribers(&self, author_id: &str) -> Result<Vec<String>> {
        let edges = self.edges.read().await;
        Ok(edges
            .subscribers
            .get(author_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_followed(&self, subscriber_id: &str) -> Result<Vec<String>> {
        let edges = self.edges.read().await;
        Ok(edges
            .followed
            .get(subscriber_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// subscriber -> (post id -> item)
#[derive(Default)]
pub struct InMemoryFeedStore {
    feeds: RwLock<HashMap<String, BTreeMap<PostId, FeedItem>>>,
}

impl InMemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items in one subscriber's feed.
    pub async fn feed_len(&self, subscriber_id: &str) -> usize {
        self.feeds
            .read()
            .await
            .get(subscriber_id)
            .map_or(0, BTreeMap::len)
    }
}

/// Version-gated insert. Returns whether the feed changed.
fn upsert_item(feed: &mut BTreeMap<PostId, FeedItem>, post: &Post) -> bool {
    match feed.get_mut(&post.id) {
        Some(existing) if existing.version >= post.version => false,
        Some(existing) => {
            *existing = FeedItem::from(post);
            true
        }
        None => {
            feed.insert(post.id, FeedItem::from(post));
            true
        }
    }
}

#[async_trait]
impl FeedStore for InMemoryFeedStore {
    async fn upsert_for_subscribers(&self, subscriber_ids: &[String], post: &Post) -> Result<u64> {
        let mut feeds = self.feeds.write().await;
        let mut written = 0;
        for subscriber_id in subscriber_ids {
            let feed = feeds.entry(subscriber_id.clone()).or_default();
            if upsert_item(feed, post) {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn upsert_posts(&self, subscriber_id: &str, posts: &[Post]) -> Result<u64> {
        let mut feeds = self.feeds.write().await;
        let feed = feeds.entry(subscriber_id.to_string()).or_default();
        Ok(posts.iter().filter(|post| upsert_item(feed, post)).count() as u64)
    }

    async fn get_feed(&self, subscriber_id: &str, page: &PageRequest) -> Result<Page<FeedItem>> {
        let rows = {
            let feeds = self.feeds.read().await;
            match feeds.get(subscriber_id) {
                Some(feed) => page_of(feed, page, |_| true),
                None => Vec::new(),
            }
        };
        paginate(page, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_create_then_get() {
        let store = InMemoryPostStore::new();
        let post = store.create_post("12345", "1234").await.unwrap();

        assert_eq!(post.version, 0);
        assert_eq!(post.created_at, post.last_modified_at);
        assert_eq!(store.get_post(post.id).await.unwrap(), post);
    }

    #[tokio::test]
    async fn test_patch_checks_author() {
        let store = InMemoryPostStore::new();
        let post = store.create_post("12345", "1234").await.unwrap();

        let err = store.patch_post(post.id, "99999", "hijack").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let patched = store.patch_post(post.id, "12345", "new text").await.unwrap();
        assert_eq!(patched.version, 1);
        assert_eq!(patched.text, "new text");
        assert!(patched.last_modified_at >= patched.created_at);

        let missing = IdGenerator::new().next_id();
        let err = store.patch_post(missing, "12345", "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_self_subscription_rejected() {
        let graph = InMemorySubscriptionGraph::new();
        let err = graph.subscribe("a", "a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientError);
    }

    #[tokio::test]
    async fn test_subscribe_twice_keeps_one_edge() {
        let graph = InMemorySubscriptionGraph::new();
        assert!(graph.subscribe("a", "b").await.unwrap());
        assert!(!graph.subscribe("a", "b").await.unwrap());

        assert_eq!(graph.list_subscribers("b").await.unwrap(), vec!["a"]);
        assert_eq!(graph.list_followed("a").await.unwrap(), vec!["b"]);
        assert!(graph.list_followed("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_feed_ignores_older_versions() {
        let posts = InMemoryPostStore::new();
        let feeds = InMemoryFeedStore::new();
        let original = posts.create_post("author", "v0").await.unwrap();
        let patched = posts.patch_post(original.id, "author", "v1").await.unwrap();

        let subscribers = vec!["reader".to_string()];
        assert_eq!(feeds.upsert_for_subscribers(&subscribers, &patched).await.unwrap(), 1);
        // A stale copy arriving late must not win.
        assert_eq!(feeds.upsert_for_subscribers(&subscribers, &original).await.unwrap(), 0);

        let page = feeds.get_feed("reader", &PageRequest::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].text, "v1");
    }
}
