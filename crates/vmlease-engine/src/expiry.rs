//! 만료 처리.
//!
//! 만료 트리거는 세션 만료 시각에 예약된 `Expire` 작업이다.
//! 실행 시점에 세션이 여전히 active이고 만료 시각이 지났을 때만 종료 파이프라인을 시작하므로,
//! 연장으로 만료 시각이 밀린 뒤 발화한 예전 트리거는 아무 일도 하지 않는다.
//!
//! 트리거를 놓친 세션(예약이 없는 persistent 세션, 프로비저닝이 늦게 끝난 세션 등)은
//! 주기적인 스윕이 찾아 트리거를 다시 넣는다.

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vmlease_core::config::TerminationConfig;
use vmlease_core::error::CoreError;
use vmlease_core::models::session::SessionStatus;
use vmlease_core::models::task::{
    NewTask, Task, TaskKind, TaskOutcome, TerminateStep, TerminationRequest,
};

use crate::context::EngineContext;
use crate::runtime::{outcome_for, StepRetryPolicy, TaskHandler};

/// `Expire` 작업 처리기
pub struct ExpiryHandler {
    ctx: EngineContext,
    policy: StepRetryPolicy,
}

impl ExpiryHandler {
    /// 새 처리기 생성
    pub fn new(ctx: EngineContext, config: &TerminationConfig) -> Self {
        Self {
            ctx,
            policy: StepRetryPolicy::new(config.max_attempts, &config.backoff_secs),
        }
    }

    async fn check(&self, task: &Task) -> Result<TaskOutcome, CoreError> {
        let mut session = self.ctx.load_session(task.session_id).await?;
        let now = self.ctx.clock.now();

        if session.status != SessionStatus::Active {
            debug!(
                "만료 트리거 무시: session={} 상태 '{}'",
                session.id, session.status
            );
            return Ok(TaskOutcome::done());
        }
        if !session.is_past_expiry(now) {
            debug!(
                "만료 트리거 무시 (연장됨): session={}, expires_at={}",
                session.id, session.expires_at
            );
            return Ok(TaskOutcome::done());
        }

        // 바로 expiring으로 표시해 중복 트리거가 두 번째 종료 체인을 만들지 않게 한다
        let seen = session.updated_at;
        session.transition(SessionStatus::Expiring, now);
        match self.ctx.sessions.save_if_unchanged(&session, seen).await {
            Ok(()) => {}
            Err(CoreError::InvalidState { .. }) => {
                debug!("만료 트리거 무시 (동시 갱신): session={}", session.id);
                return Ok(TaskOutcome::done());
            }
            Err(e) => return Err(e),
        }
        info!("세션 만료: session={}", session.id);

        Ok(TaskOutcome::then(TaskKind::Terminate {
            step: TerminateStep::Begin,
            request: TerminationRequest::expiry(),
        }))
    }
}

#[async_trait]
impl TaskHandler for ExpiryHandler {
    async fn run(&self, task: &Task) -> TaskOutcome {
        match self.check(task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("만료 확인 실패: session={}: {e}", task.session_id);
                outcome_for(&e)
            }
        }
    }

    async fn on_exhausted(&self, task: &Task, error: &str) {
        // 다음 스윕이 다시 트리거를 넣는다
        warn!("만료 트리거 포기: session={}: {error}", task.session_id);
    }

    fn retry_policy(&self) -> &StepRetryPolicy {
        &self.policy
    }
}

/// 만료 스윕
pub struct ExpirySweeper {
    ctx: EngineContext,
}

impl ExpirySweeper {
    /// 새 스위퍼 생성
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// 만료 시각이 지난 active 세션에 트리거 추가 → 추가 건수
    pub async fn sweep(&self) -> Result<usize, CoreError> {
        let now = self.ctx.clock.now();
        let overdue = self.ctx.sessions.list_expired_active(now).await?;

        for session in &overdue {
            self.ctx
                .queue
                .enqueue(NewTask::for_session(session.id, TaskKind::Expire, now))
                .await?;
        }

        if !overdue.is_empty() {
            info!("만료 스윕: {}개 세션 트리거", overdue.len());
        }
        Ok(overdue.len())
    }
}
