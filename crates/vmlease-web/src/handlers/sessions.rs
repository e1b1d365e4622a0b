//! 세션 API 핸들러.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vmlease_core::models::session::{Session, SessionId};
use vmlease_core::ports::gateway::ConnectionDetails;
use vmlease_engine::session_service::{CreateSessionRequest, TerminateOptions, ViewerLink};

use super::CurrentUser;
use crate::error::ApiError;
use crate::AppState;

/// 세션 응답 DTO
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// 세션 ID
    pub session_id: String,
    /// 상태
    pub status: String,
    /// 세션 유형
    pub session_type: String,
    /// 템플릿 ID
    pub template_id: i64,
    /// 배치 노드
    pub node: String,
    /// VMID (클론 후)
    pub vm_id: Option<u32>,
    /// 게스트 IP (부팅 후)
    pub guest_ip: Option<String>,
    /// 만료 시각 (RFC3339)
    pub expires_at: String,
    /// 남은 시간 (분)
    pub remaining_minutes: i64,
    /// 운영자 메모 (실패 사유 등)
    pub status_note: Option<String>,
    /// 생성 시각 (RFC3339)
    pub created_at: String,
}

impl SessionResponse {
    fn from_session(session: Session, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id.to_string(),
            status: session.status.as_str().to_string(),
            session_type: session.session_type.as_str().to_string(),
            template_id: session.template_id.0,
            remaining_minutes: session.remaining_minutes(now),
            expires_at: session.expires_at.to_rfc3339(),
            created_at: session.created_at.to_rfc3339(),
            node: session.node,
            vm_id: session.vm_id,
            guest_ip: session.guest_ip,
            status_note: session.status_note,
        }
    }
}

/// 연장 요청
#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    /// 추가 시간 (분)
    pub minutes: i64,
}

fn parse_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse::<SessionId>().map_err(ApiError::from)
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// 세션 생성
///
/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let request = json_body(body)?;
    let session = state.sessions.create(&user, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::from_session(session, state.sessions.now())),
    ))
}

/// 내 세션 목록
///
/// GET /api/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let now = state.sessions.now();
    let sessions = state.sessions.list(&user).await?;
    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionResponse::from_session(s, now))
            .collect(),
    ))
}

/// 세션 상세
///
/// GET /api/sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.sessions.get(&user, parse_id(&id)?).await?;
    Ok(Json(SessionResponse::from_session(
        session,
        state.sessions.now(),
    )))
}

/// 세션 연장
///
/// POST /api/sessions/{id}/extend
pub async fn extend_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    body: Result<Json<ExtendRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let request = json_body(body)?;
    let session = state
        .sessions
        .extend(&user, parse_id(&id)?, request.minutes)
        .await?;
    Ok(Json(SessionResponse::from_session(
        session,
        state.sessions.now(),
    )))
}

/// 세션 종료 요청 (비동기 처리)
///
/// DELETE /api/sessions/{id}
pub async fn terminate_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    body: Option<Json<TerminateOptions>>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let options = body.map(|Json(o)| o).unwrap_or_default();
    let session = state
        .sessions
        .terminate(&user, parse_id(&id)?, options)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SessionResponse::from_session(session, state.sessions.now())),
    ))
}

/// 뷰어 URL 발급
///
/// POST /api/sessions/{id}/viewer
pub async fn create_viewer_link(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ViewerLink>, ApiError> {
    let link = state.sessions.viewer_link(&user, parse_id(&id)?).await?;
    Ok(Json(link))
}

/// 게이트웨이 연결 상세
///
/// GET /api/sessions/{id}/connection
pub async fn get_connection(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ConnectionDetails>, ApiError> {
    let details = state.sessions.connection(&user, parse_id(&id)?).await?;
    Ok(Json(details))
}
