//! API 라우트 정의.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::AppState;

/// API 라우트 생성
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health))
        // 세션
        .route(
            "/sessions",
            get(handlers::sessions::list_sessions).post(handlers::sessions::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::sessions::get_session).delete(handlers::sessions::terminate_session),
        )
        .route(
            "/sessions/{id}/extend",
            post(handlers::sessions::extend_session),
        )
        .route(
            "/sessions/{id}/viewer",
            post(handlers::sessions::create_viewer_link),
        )
        .route(
            "/sessions/{id}/connection",
            get(handlers::sessions::get_connection),
        )
}
