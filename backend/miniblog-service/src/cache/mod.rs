/// Read-through post cache
///
/// [`CachedPostStore`] wraps any [`PostStore`] with a [`VersionedCache`].
/// Reads are served from the cache when possible; every committed write is
/// pushed to the cache with a version-gated compare-and-set, so a delayed
/// writer can never replace a newer entry. Cache faults are logged and never
/// reach the caller.
use std::sync::Arc;

use async_trait::async_trait;
use post_cache::{CacheKey, VersionedCache};

use crate::db::PostStore;
use crate::error::Result;
use crate::models::{Post, PostId};
use crate::pagination::{Page, PageRequest};

/// Outcome of a cache read.
enum Lookup {
    Hit(Post),
    Miss,
    /// The backend could not be reached; the caller skips populating it.
    Unavailable,
}

pub struct CachedPostStore {
    inner: Arc<dyn PostStore>,
    cache: Arc<dyn VersionedCache>,
}

impl CachedPostStore {
    pub fn new(inner: Arc<dyn PostStore>, cache: Arc<dyn VersionedCache>) -> Self {
        Self { inner, cache }
    }

    async fn cached(&self, id: PostId) -> Lookup {
        let key = CacheKey::post(id);
        match self.cache.get(&key).await {
            Ok(Some(entry)) => match serde_json::from_str::<Post>(&entry.value) {
                Ok(post) => Lookup::Hit(post),
                Err(err) => {
                    tracing::warn!(post_id = %id, "discarding undecodable cache entry: {}", err);
                    Lookup::Miss
                }
            },
            Ok(None) => Lookup::Miss,
            Err(err) => {
                tracing::warn!(post_id = %id, "post cache read failed: {}", err);
                Lookup::Unavailable
            }
        }
    }

    /// Write `post` to the cache unless a newer version is already there.
    pub async fn update_cache(&self, post: &Post) {
        let value = match serde_json::to_string(post) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(post_id = %post.id, "post cache encode failed: {}", err);
                return;
            }
        };

        let key = CacheKey::post(post.id);
        match self.cache.compare_and_set(&key, post.version, &value).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    post_id = %post.id,
                    version = post.version,
                    "cache already holds a newer post version"
                );
            }
            Err(err) => {
                tracing::warn!(post_id = %post.id, "post cache set failed: {}", err);
            }
        }
    }
}

#[async_trait]
impl PostStore for CachedPostStore {
    async fn create_post(&self, author_id: &str, text: &str) -> Result<Post> {
        let post = self.inner.create_post(author_id, text).await?;
        self.update_cache(&post).await;
        Ok(post)
    }

    async fn get_post(&self, id: PostId) -> Result<Post> {
        match self.cached(id).await {
            Lookup::Hit(post) => Ok(post),
            Lookup::Miss => {
                let post = self.inner.get_post(id).await?;
                self.update_cache(&post).await;
                Ok(post)
            }
            Lookup::Unavailable => self.inner.get_post(id).await,
        }
    }

    async fn patch_post(&self, id: PostId, author_id: &str, text: &str) -> Result<Post> {
        let post = self.inner.patch_post(id, author_id, text).await?;
        self.update_cache(&post).await;
        Ok(post)
    }

    async fn list_posts_by_author(&self, author_id: &str, page: &PageRequest) -> Result<Page<Post>> {
        self.inner.list_posts_by_author(author_id, page).await
    }
}
