/// HTTP request handlers
///
/// - `posts`: create, read, edit and list posts
/// - `subscriptions`: follow users, list followers and followed users
/// - `feed`: read the caller's materialized feed
/// - `health`: liveness probe
use actix_web::{error::JsonPayloadError, web, HttpRequest};
use serde::Deserialize;

use crate::error::AppError;
use crate::pagination::PageRequest;

pub mod feed;
pub mod health;
pub mod posts;
pub mod subscriptions;

/// Raw pagination query; validated into a [`PageRequest`].
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub size: Option<String>,
}

impl PageQuery {
    pub fn to_request(&self) -> Result<PageRequest, AppError> {
        PageRequest::from_query(self.page.as_deref(), self.size.as_deref())
    }
}

/// Body for creating and editing posts.
#[derive(Debug, Deserialize)]
pub struct PostTextRequest {
    pub text: String,
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::BadRequest(err.to_string()).into()
}

/// Register all API routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .route("/api/v1/health", web::get().to(health::health))
        .service(
            web::scope("/api/v1")
                .service(
                    web::resource("/posts").route(web::post().to(posts::create_post)),
                )
                .service(
                    web::resource("/posts/{post_id}")
                        .route(web::get().to(posts::get_post))
                        .route(web::patch().to(posts::patch_post)),
                )
                .service(
                    web::resource("/users/{user_id}/posts")
                        .route(web::get().to(posts::list_user_posts)),
                )
                .service(
                    web::resource("/users/{user_id}/subscribe")
                        .route(web::post().to(subscriptions::subscribe)),
                )
                .route("/subscriptions", web::get().to(subscriptions::list_followed))
                .route("/subscribers", web::get().to(subscriptions::list_subscribers))
                .route("/feed", web::get().to(feed::get_feed)),
        );
}
