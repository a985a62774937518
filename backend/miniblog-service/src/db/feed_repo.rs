use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::FeedStore;
use crate::error::Result;
use crate::models::{FeedItem, Post};
use crate::pagination::{paginate, Page, PageRequest};

/// Feed store backed by the `feed_items` table.
///
/// Upserts only replace a row when the incoming version is strictly newer,
/// so redelivered or reordered fan-out writes never move an item backwards.
pub struct PgFeedStore {
    pool: PgPool,
}

impl PgFeedStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedStore for PgFeedStore {
    async fn upsert_for_subscribers(&self, subscriber_ids: &[String], post: &Post) -> Result<u64> {
        if subscriber_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO feed_items
                (subscriber_id, post_id, author_id, text, created_at, last_modified_at, version)
            SELECT subscriber_id, $2, $3, $4, $5, $6, $7
            FROM UNNEST($1::text[]) AS s(subscriber_id)
            ON CONFLICT (subscriber_id, post_id) DO UPDATE
            SET author_id = EXCLUDED.author_id,
                text = EXCLUDED.text,
                last_modified_at = EXCLUDED.last_modified_at,
                version = EXCLUDED.version
            WHERE feed_items.version < EXCLUDED.version
            "#,
        )
        .bind(subscriber_ids)
        .bind(post.id)
        .bind(&post.author_id)
        .bind(&post.text)
        .bind(post.created_at)
        .bind(post.last_modified_at)
        .bind(post.version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_posts(&self, subscriber_id: &str, posts: &[Post]) -> Result<u64> {
        if posts.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = posts.iter().map(|p| p.id.as_uuid()).collect();
        let authors: Vec<String> = posts.iter().map(|p| p.author_id.clone()).collect();
        let texts: Vec<String> = posts.iter().map(|p| p.text.clone()).collect();
        let created: Vec<DateTime<Utc>> = posts.iter().map(|p| p.created_at).collect();
        let modified: Vec<DateTime<Utc>> = posts.iter().map(|p| p.last_modified_at).collect();
        let versions: Vec<i64> = posts.iter().map(|p| p.version).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO feed_items
                (subscriber_id, post_id, author_id, text, created_at, last_modified_at, version)
            SELECT $1, p.post_id, p.author_id, p.text, p.created_at, p.last_modified_at, p.version
            FROM UNNEST($2::uuid[], $3::text[], $4::text[], $5::timestamptz[], $6::timestamptz[], $7::bigint[])
                AS p(post_id, author_id, text, created_at, last_modified_at, version)
            ON CONFLICT (subscriber_id, post_id) DO UPDATE
            SET author_id = EXCLUDED.author_id,
                text = EXCLUDED.text,
                last_modified_at = EXCLUDED.last_modified_at,
                version = EXCLUDED.version
            WHERE feed_items.version < EXCLUDED.version
            "#,
        )
        .bind(subscriber_id)
        .bind(&ids)
        .bind(&authors)
        .bind(&texts)
        .bind(&created)
        .bind(&modified)
        .bind(&versions)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_feed(&self, subscriber_id: &str, page: &PageRequest) -> Result<Page<FeedItem>> {
        let rows = sqlx::query_as::<_, FeedItem>(
            r#"
            SELECT post_id AS id, author_id, text, created_at, last_modified_at, version
            FROM feed_items
            WHERE subscriber_id = $1
              AND ($2::uuid IS NULL OR post_id <= $2)
            ORDER BY post_id DESC
            LIMIT $3
            "#,
        )
        .bind(subscriber_id)
        .bind(page.cursor)
        .bind(page.fetch_limit())
        .fetch_all(&self.pool)
        .await?;

        paginate(page, rows)
    }
}
