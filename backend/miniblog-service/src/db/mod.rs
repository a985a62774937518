/// Storage layer
///
/// Each store is a trait with a Postgres implementation (sqlx) and an
/// in-memory implementation. The concrete backend is chosen once at startup.
use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{FeedItem, Post, PostId};
use crate::pagination::{Page, PageRequest};

pub mod feed_repo;
pub mod memory;
pub mod post_repo;
pub mod subscription_repo;

pub use feed_repo::PgFeedStore;
pub use memory::{InMemoryFeedStore, InMemoryPostStore, InMemorySubscriptionGraph};
pub use post_repo::PgPostStore;
pub use subscription_repo::PgSubscriptionGraph;

/// Authoritative post storage with optimistic versioning.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Store a new post with a fresh id and `version = 0`.
    async fn create_post(&self, author_id: &str, text: &str) -> Result<Post>;

    async fn get_post(&self, id: PostId) -> Result<Post>;

    /// Replace the text of a post owned by `author_id` and bump its version.
    ///
    /// Fails `NotFound` for an unknown id and `Forbidden` when another author
    /// owns the post. Returns the post as committed.
    async fn patch_post(&self, id: PostId, author_id: &str, text: &str) -> Result<Post>;

    async fn list_posts_by_author(&self, author_id: &str, page: &PageRequest) -> Result<Page<Post>>;
}

/// Follower / followed edges.
#[async_trait]
pub trait SubscriptionGraph: Send + Sync {
    /// Insert the edge. Returns `false` when it already existed.
    async fn subscribe(&self, follower_id: &str, followed_id: &str) -> Result<bool>;

    async fn list_subscribers(&self, author_id: &str) -> Result<Vec<String>>;

    async fn list_followed(&self, subscriber_id: &str) -> Result<Vec<String>>;
}

/// Per-subscriber denormalized post copies.
///
/// All writes are version-gated: an existing item is only replaced by a
/// strictly newer version of the same post.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Upsert `post` into the feed of every subscriber in `subscriber_ids`.
    async fn upsert_for_subscribers(&self, subscriber_ids: &[String], post: &Post) -> Result<u64>;

    /// Upsert `posts` into one subscriber's feed.
    async fn upsert_posts(&self, subscriber_id: &str, posts: &[Post]) -> Result<u64>;

    async fn get_feed(&self, subscriber_id: &str, page: &PageRequest) -> Result<Page<FeedItem>>;
}

pub(crate) fn ensure_not_self(follower_id: &str, followed_id: &str) -> Result<()> {
    if follower_id == followed_id {
        return Err(AppError::BadRequest(
            "users cannot subscribe to themselves".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn post_not_found(id: PostId) -> AppError {
    AppError::NotFound(format!("post {} does not exist", id))
}
