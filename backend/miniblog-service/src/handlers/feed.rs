use actix_web::{web, HttpResponse};

use super::PageQuery;
use crate::error::Result;
use crate::middleware::UserId;
use crate::pagination::PageResponse;
use crate::services::FeedService;

/// The caller's feed, newest first.
pub async fn get_feed(
    service: web::Data<FeedService>,
    user_id: UserId,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let page = query.to_request()?;
    let feed = service.get_feed(user_id.as_str(), &page).await?;
    Ok(HttpResponse::Ok().json(PageResponse::from(feed)))
}
