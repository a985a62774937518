use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::error::Result;
use crate::middleware::UserId;
use crate::services::SubscriptionService;

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<String>,
}

/// Follow `{user_id}` as the calling user.
pub async fn subscribe(
    service: web::Data<SubscriptionService>,
    user_id: UserId,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    service.subscribe(user_id.as_str(), &path).await?;
    Ok(HttpResponse::Ok().finish())
}

/// Users the caller follows.
pub async fn list_followed(
    service: web::Data<SubscriptionService>,
    user_id: UserId,
) -> Result<HttpResponse> {
    let users = service.list_followed(user_id.as_str()).await?;
    Ok(HttpResponse::Ok().json(UsersResponse { users }))
}

/// Users following the caller.
pub async fn list_subscribers(
    service: web::Data<SubscriptionService>,
    user_id: UserId,
) -> Result<HttpResponse> {
    let users = service.list_subscribers(user_id.as_str()).await?;
    Ok(HttpResponse::Ok().json(UsersResponse { users }))
}
