//! 세션 연장.
//!
//! 새 만료 시각은 기존 만료 시각 + 추가 분이다 (요청 시각 기준이 아님).
//! ephemeral 세션은 새 만료 시각에 트리거를 다시 예약한다. 예전 트리거는 발화해도
//! 만료 시각이 지나지 않았으므로 무시된다.

use std::sync::Arc;
use tracing::info;
use vmlease_core::error::CoreError;
use vmlease_core::models::session::{Session, SessionId, SessionStatus, SessionType};
use vmlease_core::models::task::{NewTask, TaskKind};

use crate::context::EngineContext;
use crate::quota::QuotaGuard;

/// 세션 연장기
pub struct SessionExtender {
    ctx: EngineContext,
    quota: Arc<QuotaGuard>,
}

impl SessionExtender {
    /// 새 연장기 생성
    pub fn new(ctx: EngineContext, quota: Arc<QuotaGuard>) -> Self {
        Self { ctx, quota }
    }

    /// 소유자의 active 세션을 `minutes`분 연장
    pub async fn extend(
        &self,
        user_id: &str,
        session_id: SessionId,
        minutes: i64,
    ) -> Result<Session, CoreError> {
        let mut session = self.ctx.load_session(session_id).await?;
        if session.user_id != user_id {
            return Err(CoreError::Forbidden(format!(
                "다른 사용자의 세션입니다: {session_id}"
            )));
        }

        let now = self.ctx.clock.now();
        if session.status != SessionStatus::Active || session.is_past_expiry(now) {
            return Err(CoreError::InvalidState {
                session_id: session_id.to_string(),
                status: session.status.to_string(),
                action: "extend".to_string(),
            });
        }

        self.quota.admit_extension(user_id, minutes).await?;

        let seen = session.updated_at;
        session.expires_at += chrono::Duration::minutes(minutes);
        session.updated_at = now;
        // 만료 처리와 겹치면 InvalidState로 거부된다
        self.ctx.sessions.save_if_unchanged(&session, seen).await?;

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
            "세션 연장: session={session_id}, +{minutes}분 → {}",
            session.expires_at
        );
        Ok(session)
    }
}
