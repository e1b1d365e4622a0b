//! API 핸들러 모듈.

pub mod health;
pub mod sessions;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

/// 상위 인증 프록시가 채워 주는 사용자 헤더
pub const USER_HEADER: &str = "x-user-id";

/// 요청 사용자
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("{USER_HEADER} 헤더가 없습니다")))?;
        let user = value
            .to_str()
            .map_err(|_| ApiError::BadRequest(format!("{USER_HEADER} 헤더가 올바르지 않습니다")))?
            .trim();
        if user.is_empty() {
            return Err(ApiError::Unauthorized(format!(
                "{USER_HEADER} 헤더가 비어 있습니다"
            )));
        }
        Ok(CurrentUser(user.to_string()))
    }
}
