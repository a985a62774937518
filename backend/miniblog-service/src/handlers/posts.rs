/// Post handlers - HTTP endpoints for post operations
use actix_web::{web, HttpResponse};

use super::{PageQuery, PostTextRequest};
use crate::error::{AppError, Result};
use crate::middleware::UserId;
use crate::models::PostId;
use crate::pagination::PageResponse;
use crate::services::PostService;

/// An id that does not parse can not name an existing post.
fn parse_post_id(raw: &str) -> Result<PostId> {
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("post {} does not exist", raw)))
}

pub async fn create_post(
    service: web::Data<PostService>,
    user_id: UserId,
    req: web::Json<PostTextRequest>,
) -> Result<HttpResponse> {
    let post = service.add_post(user_id.as_str(), &req.text).await?;
    Ok(HttpResponse::Ok().json(post))
}

pub async fn get_post(
    service: web::Data<PostService>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let post_id = parse_post_id(&path)?;
    let post = service.get_post(post_id).await?;
    Ok(HttpResponse::Ok().json(post))
}

pub async fn patch_post(
    service: web::Data<PostService>,
    user_id: UserId,
    path: web::Path<String>,
    req: web::Json<PostTextRequest>,
) -> Result<HttpResponse> {
    let post_id = parse_post_id(&path)?;
    let post = service
        .patch_post(post_id, user_id.as_str(), &req.text)
        .await?;
    Ok(HttpResponse::Ok().json(post))
}

pub async fn list_user_posts(
    service: web::Data<PostService>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let page = query.to_request()?;
    let posts = service.list_posts_by_author(&path, &page).await?;
    Ok(HttpResponse::Ok().json(PageResponse::from(posts)))
}
