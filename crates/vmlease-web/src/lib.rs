//! # vmlease-web
//!
//! 세션 요청용 REST 경계.
//! 사용자 식별은 상위 인증 프록시가 넣어 주는 `x-user-id` 헤더를 따른다.
//!
//! ## 엔드포인트
//! - `POST /api/sessions`, `GET /api/sessions`
//! - `GET /api/sessions/{id}`, `DELETE /api/sessions/{id}`
//! - `POST /api/sessions/{id}/extend`
//! - `POST /api/sessions/{id}/viewer`
//! - `GET /api/health`

pub mod error;
pub mod handlers;
pub mod routes;

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;
use vmlease_core::config::ServerConfig;
use vmlease_engine::session_service::SessionService;

/// 웹 서버 애플리케이션 상태
#[derive(Clone)]
pub struct AppState {
    /// 세션 서비스
    pub sessions: Arc<SessionService>,
}

/// 전체 라우터 (`/api` 하위)
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// REST API 서버
pub struct WebServer {
    config: ServerConfig,
    state: AppState,
}

impl WebServer {
    /// 새 웹 서버 생성
    pub fn new(sessions: Arc<SessionService>, config: ServerConfig) -> Self {
        Self {
            config,
            state: AppState { sessions },
        }
    }

    /// 바인드 주소
    pub fn addr(&self) -> Result<SocketAddr, std::io::Error> {
        format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!(
                        "잘못된 주소 {}:{}: {e}",
                        self.config.host, self.config.port
                    ),
                )
            })
    }

    /// 서버 실행
    ///
    /// `shutdown_rx`가 `true`가 되면 진행 중인 요청을 마치고 종료한다.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), std::io::Error> {
        let addr = self.addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!("REST API 서버 시작: http://{addr}");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move {
                loop {
                    if *shutdown_rx.borrow() {
                        info!("웹 서버 종료 신호 수신");
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await?;

        info!("REST API 서버 종료");
        Ok(())
    }
}
