use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use super::{post_not_found, PostStore};
use crate::error::{AppError, Result};
use crate::models::{IdGenerator, Post, PostId};
use crate::pagination::{paginate, Page, PageRequest};

/// Post store backed by the `posts` table.
pub struct PgPostStore {
    pool: PgPool,
    ids: IdGenerator,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ids: IdGenerator::new(),
        }
    }
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn create_post(&self, author_id: &str, text: &str) -> Result<Post> {
        let id = self.ids.next_id();

        let post = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (id, author_id, text, created_at, last_modified_at, version)
            VALUES ($1, $2, $3, $4, $4, 0)
            RETURNING id, author_id, text, created_at, last_modified_at, version
            "#,
        )
        .bind(id)
        .bind(author_id)
        .bind(text)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(post)
    }

    async fn get_post(&self, id: PostId) -> Result<Post> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, text, created_at, last_modified_at, version
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| post_not_found(id))
    }

    async fn patch_post(&self, id: PostId, author_id: &str, text: &str) -> Result<Post> {
        // Author check and version bump happen in one statement.
        let updated = sqlx::query_as::<_, Post>(
            r#"
            UPDATE posts
            SET text = $3,
                last_modified_at = GREATEST(NOW(), created_at),
                version = version + 1
            WHERE id = $1 AND author_id = $2
            RETURNING id, author_id, text, created_at, last_modified_at, version
            "#,
        )
        .bind(id)
        .bind(author_id)
        .bind(text)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(post) = updated {
            return Ok(post);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        if exists {
            Err(AppError::Forbidden(format!(
                "post {} belongs to another author",
                id
            )))
        } else {
            Err(post_not_found(id))
        }
    }

    async fn list_posts_by_author(&self, author_id: &str, page: &PageRequest) -> Result<Page<Post>> {
        let rows = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, author_id, text, created_at, last_modified_at, version
            FROM posts
            WHERE author_id = $1
              AND ($2::uuid IS NULL OR id <= $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(author_id)
        .bind(page.cursor)
        .bind(page.fetch_limit())
        .fetch_all(&self.pool)
        .await?;

        paginate(page, rows)
    }
}
