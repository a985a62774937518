/// Request identity
///
/// The caller is identified by the trusted `System-Design-User-Id` header set
/// by the edge proxy. Handlers that act on behalf of a user take a [`UserId`]
/// argument; a missing or empty header fails the request with 401.
use actix_web::{dev::Payload, FromRequest, HttpRequest};
use std::future::{ready, Ready};

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "System-Design-User-Id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromRequest for UserId {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let user_id = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_string()))
            .ok_or_else(|| AppError::Unauthorized("Invalid user token".to_string()));

        ready(user_id)
    }
}
