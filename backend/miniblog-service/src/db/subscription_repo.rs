use async_trait::async_trait;
use sqlx::PgPool;

use super::{ensure_not_self, SubscriptionGraph};
use crate::error::Result;

/// Subscription graph backed by the `subscriptions` table.
pub struct PgSubscriptionGraph {
    pool: PgPool,
}

impl PgSubscriptionGraph {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionGraph for PgSubscriptionGraph {
    async fn subscribe(&self, follower_id: &str, followed_id: &str) -> Result<bool> {
        ensure_not_self(follower_id, followed_id)?;

        // ON CONFLICT DO NOTHING keeps a repeated subscribe a no-op
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (follower_id, followed_id)
            VALUES ($1, $2)
            ON CONFLICT (follower_id, followed_id) DO NOTHING
            "#,
        )
        .bind(follower_id)
        .bind(followed_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_subscribers(&self, author_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT follower_id FROM subscriptions WHERE followed_id = $1 ORDER BY follower_id",
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_followed(&self, subscriber_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT followed_id FROM subscriptions WHERE follower_id = $1 ORDER BY followed_id",
        )
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
