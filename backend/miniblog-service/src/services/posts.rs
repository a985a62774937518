/// Post service - handles post creation, retrieval, and editing
use std::sync::Arc;

use event_queue::{EventEnvelope, EventPublisher, FeedEvent};

use crate::db::PostStore;
use crate::error::{AppError, Result};
use crate::models::{Post, PostId};
use crate::pagination::{Page, PageRequest};

pub struct PostService {
    posts: Arc<dyn PostStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl PostService {
    /// `posts` is normally a cached store; reads and writes go through it.
    pub fn new(posts: Arc<dyn PostStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { posts, publisher }
    }

    /// Create a post and schedule its fan-out.
    pub async fn add_post(&self, author_id: &str, text: &str) -> Result<Post> {
        let post = self.posts.create_post(author_id, text).await?;

        let event = FeedEvent::PostCreated {
            post_id: post.id.as_uuid(),
            author_id: post.author_id.clone(),
        };
        self.publish(event, post.id).await?;

        tracing::info!(post_id = %post.id, author_id = %post.author_id, "Post created");
        Ok(post)
    }

    pub async fn get_post(&self, id: PostId) -> Result<Post> {
        self.posts.get_post(id).await
    }

    /// Edit a post owned by `author_id` and schedule a refresh of feed copies.
    pub async fn patch_post(&self, id: PostId, author_id: &str, text: &str) -> Result<Post> {
        let post = self.posts.patch_post(id, author_id, text).await?;

        self.publish(FeedEvent::PostPatched { post_id: id.as_uuid() }, id)
            .await?;

        tracing::info!(post_id = %post.id, version = post.version, "Post patched");
        Ok(post)
    }

    pub async fn list_posts_by_author(&self, author_id: &str, page: &PageRequest) -> Result<Page<Post>> {
        self.posts.list_posts_by_author(author_id, page).await
    }

    async fn publish(&self, event: FeedEvent, post_id: PostId) -> Result<()> {
        let envelope = EventEnvelope::new(event);
        if let Err(err) = self.publisher.publish(&envelope).await {
            // The post is committed but its fan-out was never scheduled.
            tracing::error!(
                post_id = %post_id,
                event_id = %envelope.event_id,
                event_type = envelope.event.event_type(),
                error = %err,
                "Failed to publish feed event after commit"
            );
            return Err(AppError::from(err));
        }
        Ok(())
    }
}
