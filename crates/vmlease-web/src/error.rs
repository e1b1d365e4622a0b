//! API 에러 처리.
//!
//! 도메인 에러 종류를 HTTP 상태 코드로 옮긴다. 본문은 항상 `{ error, status }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use vmlease_core::error::CoreError;

/// API 에러
#[derive(Debug, Error)]
pub enum ApiError {
    /// 인증 헤더 없음
    #[error("인증 필요: {0}")]
    Unauthorized(String),

    /// 잘못된 요청
    #[error("잘못된 요청: {0}")]
    BadRequest(String),

    /// 엔진 에러
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// 에러 응답 본문
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// 에러 메시지
    pub error: String,
    /// HTTP 상태 코드
    pub status: u16,
}

impl ApiError {
    /// 응답 상태 코드
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(err) => core_status(err),
        }
    }
}

fn core_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Quota(_) => StatusCode::CONFLICT,
        CoreError::InvalidState { .. } => StatusCode::CONFLICT,
        CoreError::Placement(_) | CoreError::VmidExhausted { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CoreError::ViewerRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
        CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
        CoreError::Api { .. }
        | CoreError::Network(_)
        | CoreError::RateLimit { .. }
        | CoreError::ServiceUnavailable(_)
        | CoreError::GatewayTimeout(_)
        | CoreError::RequestTimeout(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("API 에러 ({}): {self}", status.as_u16());
        }

        let body = ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmlease_core::error::{PlacementError, QuotaRejection};

    #[test]
    fn domain_errors_map_to_status() {
        let cases = [
            (
                CoreError::Quota(QuotaRejection::TooManySessions { active: 3, max: 3 }),
                StatusCode::CONFLICT,
            ),
            (
                CoreError::Placement(PlacementError::NoActiveClusters),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CoreError::ViewerRateLimited { limit: 10 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                CoreError::not_found("Session", "x"),
                StatusCode::NOT_FOUND,
            ),
            (
                CoreError::Forbidden("다른 사용자".to_string()),
                StatusCode::FORBIDDEN,
            ),
            (
                CoreError::validation("duration_minutes", "범위 밖"),
                StatusCode::BAD_REQUEST,
            ),
            (
                CoreError::Api {
                    status: 500,
                    message: "boom".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                CoreError::Internal("?".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn message_is_human_readable() {
        let err = ApiError::from(CoreError::Quota(QuotaRejection::MinutesExceeded {
            current: 200,
            requested: 60,
            max: 240,
        }));
        assert!(err.to_string().contains("한도 240분"));
    }
}
