/// Feed service - reads materialized subscriber feeds
use std::sync::Arc;

use crate::db::FeedStore;
use crate::error::Result;
use crate::models::FeedItem;
use crate::pagination::{Page, PageRequest};

pub struct FeedService {
    feeds: Arc<dyn FeedStore>,
}

impl FeedService {
    pub fn new(feeds: Arc<dyn FeedStore>) -> Self {
        Self { feeds }
    }

    pub async fn get_feed(&self, subscriber_id: &str, page: &PageRequest) -> Result<Page<FeedItem>> {
        self.feeds.get_feed(subscriber_id, page).await
    }
}
