//! 세션 라이프사이클 진입점.
//!
//! 생성(쿼터 → 배치 → pending 기록 → 프로비저닝 예약), 연장, 종료 요청,
//! 뷰어 URL 발급, 조회를 제공한다. 실제 하이퍼바이저 작업은 모두 작업 큐를 거친다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use vmlease_core::error::CoreError;
use vmlease_core::models::cluster::ClusterId;
use vmlease_core::models::session::{Session, SessionId, SessionStatus, SessionType};
use vmlease_core::models::task::{
    NewTask, ProvisionStep, TaskKind, TerminateStep, TerminationReason, TerminationRequest,
};
use vmlease_core::models::template::TemplateId;
use vmlease_core::ports::gateway::ConnectionDetails;

use crate::cluster_selector::ClusterSelector;
use crate::context::EngineContext;
use crate::extension::SessionExtender;
use crate::quota::QuotaGuard;
use crate::rate_limit::ViewerRateLimiter;

/// 종료 표시 시 동시 갱신 충돌을 다시 시도하는 횟수
const MARK_ATTEMPTS: u32 = 3;

/// 세션 생성 요청
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// 템플릿
    pub template_id: TemplateId,
    /// 사용 시간 (분)
    pub duration_minutes: i64,
    /// 세션 유형
    #[serde(default = "default_session_type")]
    pub session_type: SessionType,
    /// 특정 클러스터 지정 (없으면 자동 선택)
    #[serde(default)]
    pub cluster_id: Option<ClusterId>,
}

fn default_session_type() -> SessionType {
    SessionType::Ephemeral
}

/// 종료 옵션
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminateOptions {
    /// VM 정리 여부 (ephemeral: 삭제, persistent: 정지)
    #[serde(default = "default_stop_vm")]
    pub stop_vm: bool,
    /// 되돌릴 스냅샷 (persistent 전용)
    #[serde(default)]
    pub snapshot_name: Option<String>,
}

fn default_stop_vm() -> bool {
    true
}

impl Default for TerminateOptions {
    fn default() -> Self {
        Self {
            stop_vm: true,
            snapshot_name: None,
        }
    }
}

/// 뷰어 접속 정보
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewerLink {
    /// 토큰이 포함된 URL
    pub url: String,
    /// 토큰 유효 시간 (초)
    pub expires_in_secs: u64,
}

/// 세션 서비스
pub struct SessionService {
    ctx: EngineContext,
    clusters: Arc<ClusterSelector>,
    quota: Arc<QuotaGuard>,
    extender: SessionExtender,
    limiter: ViewerRateLimiter,
    viewer_token_ttl_secs: u64,
    /// 쿼터 확인 → 배치 → 기록을 한 번에 하나씩 수행
    admission: Mutex<()>,
}

impl SessionService {
    /// 새 서비스 생성
    pub fn new(
        ctx: EngineContext,
        clusters: Arc<ClusterSelector>,
        quota: Arc<QuotaGuard>,
        limiter: ViewerRateLimiter,
        viewer_token_ttl_secs: u64,
    ) -> Self {
        let extender = SessionExtender::new(ctx.clone(), quota.clone());
        Self {
            ctx,
            clusters,
            quota,
            extender,
            limiter,
            viewer_token_ttl_secs,
            admission: Mutex::new(()),
        }
    }

    /// 새 세션 생성
    pub async fn create(
        &self,
        user_id: &str,
        request: &CreateSessionRequest,
    ) -> Result<Session, CoreError> {
        if user_id.trim().is_empty() {
            return Err(CoreError::validation("user_id", "사용자 ID가 비어 있습니다"));
        }

        let template = self
            .ctx
            .templates
            .find_template(request.template_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Template", request.template_id))?;
        if !template.is_active {
            return Err(CoreError::validation(
                "template_id",
                format!("비활성 템플릿입니다: {}", template.name),
            ));
        }

        let _admission = self.admission.lock().await;

        self.quota.admit_new(user_id, request.duration_minutes).await?;
        let placement = self.clusters.select(request.cluster_id).await?;

        let now = self.ctx.clock.now();
        let session = Session::new_pending(
            user_id,
            template.id,
            placement.cluster_id,
            placement.node,
            request.session_type,
            now,
            request.duration_minutes,
        );
        self.ctx.sessions.insert(&session).await?;

        self.ctx
            .queue
            .enqueue(NewTask::for_session(
                session.id,
                TaskKind::Provision {
                    step: ProvisionStep::Begin,
                },
                now,
            ))
            .await?;
        if session.session_type == SessionType::Ephemeral {
            self.ctx
                .queue
                .enqueue(NewTask::for_session(
                    session.id,
                    TaskKind::Expire,
                    session.expires_at,
                ))
                .await?;
        }

        info!(
            "세션 생성: session={}, user={user_id}, template={}, 배치={}/{}",
            session.id, template.name, session.cluster_id, session.node
        );
        Ok(session)
    }

    /// 세션 연장
    pub async fn extend(
        &self,
        user_id: &str,
        session_id: SessionId,
        minutes: i64,
    ) -> Result<Session, CoreError> {
        self.extender.extend(user_id, session_id, minutes).await
    }

    /// 종료 요청
    ///
    /// 이미 종료됐거나 종료 중인 세션은 그대로 반환한다.
    pub async fn terminate(
        &self,
        user_id: &str,
        session_id: SessionId,
        options: TerminateOptions,
    ) -> Result<Session, CoreError> {
        let mut session = self.owned(user_id, session_id).await?;
        let mut attempt = 1;
        loop {
            if session.status.is_terminal() || session.status == SessionStatus::Expiring {
                return Ok(session);
            }

            // 진행 중인 단계가 같은 세션을 갱신했다면 다시 읽어서 그 위에 표시한다
            let seen = session.updated_at;
            session.transition(SessionStatus::Expiring, self.ctx.clock.now());
            match self.ctx.sessions.save_if_unchanged(&session, seen).await {
                Ok(()) => break,
                Err(CoreError::InvalidState { .. }) if attempt < MARK_ATTEMPTS => {
                    debug!("세션이 동시에 갱신됨, 다시 읽음: session={session_id}");
                    attempt += 1;
                    session = self.owned(user_id, session_id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let request = TerminationRequest {
            reason: TerminationReason::UserRequested,
            stop_vm: options.stop_vm,
            snapshot_name: options.snapshot_name,
            note: None,
        };
        self.ctx
            .queue
            .enqueue(NewTask::for_session(
                session.id,
                TaskKind::Terminate {
                    step: TerminateStep::Begin,
                    request,
                },
                self.ctx.clock.now(),
            ))
            .await?;

        info!("세션 종료 요청: session={session_id}, user={user_id}");
        Ok(session)
    }

    /// 단기 토큰이 포함된 뷰어 URL 발급
    pub async fn viewer_link(
        &self,
        user_id: &str,
        session_id: SessionId,
    ) -> Result<ViewerLink, CoreError> {
        let session = self.owned(user_id, session_id).await?;
        let connection_id = active_connection(&session, "viewer")?;

        self.limiter.check(user_id)?;
        let token = self
            .ctx
            .gateway
            .generate_auth_token(connection_id, self.viewer_token_ttl_secs)
            .await?;

        Ok(ViewerLink {
            url: self.ctx.gateway.viewer_url(connection_id, &token),
            expires_in_secs: self.viewer_token_ttl_secs,
        })
    }

    /// 게이트웨이 연결 상세
    pub async fn connection(
        &self,
        user_id: &str,
        session_id: SessionId,
    ) -> Result<ConnectionDetails, CoreError> {
        let session = self.owned(user_id, session_id).await?;
        let connection_id = active_connection(&session, "connection")?;
        self.ctx.gateway.get_connection(connection_id).await
    }

    /// 소유자 세션 조회
    pub async fn get(&self, user_id: &str, session_id: SessionId) -> Result<Session, CoreError> {
        self.owned(user_id, session_id).await
    }

    /// 사용자 세션 목록 (최신순)
    pub async fn list(&self, user_id: &str) -> Result<Vec<Session>, CoreError> {
        self.ctx.sessions.list_by_user(user_id).await
    }

    /// 현재 시각 (엔진 시계 기준)
    pub fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    /// 뷰어 제한기 기록 정리
    pub fn prune_rate_limits(&self) {
        self.limiter.prune();
    }

    async fn owned(&self, user_id: &str, session_id: SessionId) -> Result<Session, CoreError> {
        let session = self.ctx.load_session(session_id).await?;
        if session.user_id != user_id {
            return Err(CoreError::Forbidden(format!(
                "다른 사용자의 세션입니다: {session_id}"
            )));
        }
        Ok(session)
    }
}

fn active_connection<'a>(session: &'a Session, action: &str) -> Result<&'a str, CoreError> {
    match (&session.status, &session.gateway_connection_id) {
        (SessionStatus::Active, Some(connection_id)) => Ok(connection_id),
        _ => Err(CoreError::InvalidState {
            session_id: session.id.to_string(),
            status: session.status.to_string(),
            action: action.to_string(),
        }),
    }
}
