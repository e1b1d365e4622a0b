//! 종료 파이프라인.
//!
//! 순서가 고정된 단계로 세션 자원을 정리한다.
//!
//! 1. Begin: expiring 표시
//! 2. DeleteConnection: 게이트웨이 연결 삭제
//! 3. RevertSnapshot: persistent 세션 + 스냅샷 지정 시 되돌리기 (실패 무시)
//! 4. ReleaseVm: ephemeral은 VM 삭제, persistent는 정지
//! 5. Finalize: expired 또는 terminated 기록
//!
//! 연결 삭제가 끝나기 전에는 VM을 건드리지 않는다. 연결 삭제가 끝내 실패하면
//! VM은 그대로 둔 채 세션을 종료 상태로 기록하고 운영자에게 알린다.
//! 이미 종료 상태인 세션에 대한 작업은 아무것도 하지 않는다.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use vmlease_core::config::TerminationConfig;
use vmlease_core::error::CoreError;
use vmlease_core::models::session::{Session, SessionId, SessionStatus, SessionType};
use vmlease_core::models::task::{
    Task, TaskKind, TaskOutcome, TerminateStep, TerminationReason, TerminationRequest,
};
use vmlease_core::ports::notifier::AlertKind;

use crate::context::EngineContext;
use crate::runtime::{outcome_for, StepRetryPolicy, TaskHandler};

/// 종료 사유별 최종 상태
pub fn final_status(reason: TerminationReason) -> SessionStatus {
    match reason {
        TerminationReason::Expired => SessionStatus::Expired,
        TerminationReason::UserRequested => SessionStatus::Terminated,
    }
}

/// 종료 단계 처리기
pub struct TerminationPipeline {
    ctx: EngineContext,
    policy: StepRetryPolicy,
}

impl TerminationPipeline {
    /// 새 처리기 생성
    pub fn new(ctx: EngineContext, config: &TerminationConfig) -> Self {
        Self {
            ctx,
            policy: StepRetryPolicy::new(config.max_attempts, &config.backoff_secs),
        }
    }

    async fn run_step(
        &self,
        session_id: SessionId,
        step: TerminateStep,
        request: &TerminationRequest,
    ) -> Result<Option<TerminateStep>, CoreError> {
        let mut session = self.ctx.load_session(session_id).await?;
        if session.status.is_terminal() {
            debug!(
                "이미 종료된 세션: session={session_id} ({}), {step:?} 건너뜀",
                session.status
            );
            return Ok(None);
        }

        match step {
            TerminateStep::Begin => {
                if session.status != SessionStatus::Expiring {
                    session.transition(SessionStatus::Expiring, self.ctx.clock.now());
                    self.ctx.sessions.save(&session).await?;
                }
                info!("세션 종료 시작: session={session_id} ({:?})", request.reason);
            }
            TerminateStep::DeleteConnection => {
                if let Some(connection_id) = session.gateway_connection_id.take() {
                    self.ctx.gateway.delete_connection(&connection_id).await?;
                    session.updated_at = self.ctx.clock.now();
                    self.ctx.sessions.save(&session).await?;
                    debug!("게이트웨이 연결 삭제: {connection_id}");
                }
            }
            TerminateStep::RevertSnapshot => self.revert_snapshot(&session, request).await,
            TerminateStep::ReleaseVm => self.release_vm(&session, request).await?,
            TerminateStep::Finalize => {
                self.finalize(&mut session, request.reason, request.note.clone())
                    .await?;
            }
        }

        Ok(step.next())
    }

    async fn revert_snapshot(&self, session: &Session, request: &TerminationRequest) {
        if session.session_type != SessionType::Persistent {
            return;
        }
        let (Some(snapshot), Some(vm_id)) = (&request.snapshot_name, session.vm_id) else {
            return;
        };

        let result = match self.ctx.hypervisor_for(session).await {
            Ok(api) => api.rollback_snapshot(&session.node, vm_id, snapshot).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!("스냅샷 되돌리기 완료: vm={vm_id}@{snapshot}"),
            Err(e) => warn!("스냅샷 되돌리기 실패, 계속 진행: vm={vm_id}@{snapshot}: {e}"),
        }
    }

    async fn release_vm(
        &self,
        session: &Session,
        request: &TerminationRequest,
    ) -> Result<(), CoreError> {
        if !request.stop_vm {
            debug!("VM 정리 생략 요청: session={}", session.id);
            return Ok(());
        }
        let Some(vm_id) = session.vm_id else {
            return Ok(());
        };

        let api = self.ctx.hypervisor_for(session).await?;
        match session.session_type {
            SessionType::Ephemeral => {
                api.delete_vm(&session.node, vm_id).await?;
                info!("VM 삭제: session={}, vm={vm_id}", session.id);
            }
            SessionType::Persistent => match api.get_vm_status(&session.node, vm_id).await {
                Ok(status) => {
                    if status.is_running() {
                        api.stop_vm(&session.node, vm_id).await?;
                    }
                    info!("VM 정지 (보존): session={}, vm={vm_id}", session.id);
                }
                Err(CoreError::NotFound { .. }) => {
                    warn!("보존 VM이 이미 없음: session={}, vm={vm_id}", session.id);
                }
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }

    async fn finalize(
        &self,
        session: &mut Session,
        reason: TerminationReason,
        note: Option<String>,
    ) -> Result<(), CoreError> {
        let status = final_status(reason);
        if note.is_some() {
            session.status_note = note;
        }
        session.transition(status, self.ctx.clock.now());
        self.ctx.sessions.save(session).await?;
        info!("세션 종료 완료: session={} → {status}", session.id);
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for TerminationPipeline {
    async fn run(&self, task: &Task) -> TaskOutcome {
        let TaskKind::Terminate { step, request } = &task.kind else {
            return TaskOutcome::Terminal(format!("잘못된 작업 종류: {}", task.kind.label()));
        };

        match self.run_step(task.session_id, *step, request).await {
            Ok(Some(next)) => TaskOutcome::then(TaskKind::Terminate {
                step: next,
                request: request.clone(),
            }),
            Ok(None) => TaskOutcome::done(),
            Err(e) => {
                warn!(
                    "종료 단계 실패: session={}, {step:?} (시도 {}): {e}",
                    task.session_id, task.attempt
                );
                outcome_for(&e)
            }
        }
    }

    /// 어느 단계에서 소진되든 세션은 종료 상태로 기록한다.
    /// 남은 단계(특히 VM 정리)는 수행하지 않고 운영자 메모로 남긴다.
    async fn on_exhausted(&self, task: &Task, error: &str) {
        let TaskKind::Terminate { step, request } = &task.kind else {
            return;
        };
        let mut session = match self.ctx.load_session(task.session_id).await {
            Ok(session) => session,
            Err(e) => {
                error!("종료 실패 처리 대상 세션 조회 실패: {}: {e}", task.session_id);
                return;
            }
        };
        if session.status.is_terminal() {
            return;
        }

        let mut note = format!("종료 미완료 ({step:?} 실패): {error}");
        if let Some(vm_id) = session.vm_id {
            if matches!(step, TerminateStep::DeleteConnection | TerminateStep::ReleaseVm) {
                note.push_str(&format!(" / VM {vm_id}@{} 수동 정리 필요", session.node));
            }
        }

        if let Err(e) = self
            .finalize(&mut session, request.reason, Some(note.clone()))
            .await
        {
            error!("종료 상태 저장 실패: {}: {e}", session.id);
        }

        warn!("세션 종료 미완료: session={}: {note}", session.id);
        self.ctx
            .alert(AlertKind::TerminationIncomplete, session.id, note)
            .await;
    }

    fn retry_policy(&self) -> &StepRetryPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{TaskHandlers, TaskRuntime};
    use crate::test_support::Harness;
    use std::sync::Arc;
    use vmlease_core::models::task::NewTask;
    use vmlease_core::ports::clock::Clock;
    use vmlease_core::ports::repository::SessionRepository;
    use vmlease_core::ports::work_queue::WorkQueue;

    fn runtime(h: &Harness) -> TaskRuntime {
        let ctx = h.context();
        let config = TerminationConfig {
            max_attempts: 3,
            backoff_secs: vec![0],
        };
        let pipeline: Arc<dyn TaskHandler> = Arc::new(TerminationPipeline::new(ctx.clone(), &config));
        TaskRuntime::new(
            ctx.queue.clone(),
            ctx.clock.clone(),
            TaskHandlers {
                provisioning: pipeline.clone(),
                termination: pipeline.clone(),
                expiry: pipeline,
            },
            chrono::Duration::minutes(15),
        )
    }

    /// VM 201 + 연결 c1을 가진 active 세션
    async fn active_session(h: &Harness, session_type: SessionType) -> Session {
        let mut session = Session::new_pending(
            "alice",
            h.template.id,
            h.cluster.id,
            "pve1",
            session_type,
            h.clock.now(),
            60,
        );
        session.vm_id = Some(201);
        session.guest_ip = Some("10.0.0.15".to_string());
        session.gateway_connection_id = Some("c1".to_string());
        session.status = SessionStatus::Active;
        h.storage.insert(&session).await.unwrap();
        h.hypervisor.state.lock().vms.insert(201, true);
        session
    }

    async fn request_termination(h: &Harness, session: &Session, request: TerminationRequest) {
        h.storage
            .enqueue(NewTask::for_session(
                session.id,
                TaskKind::Terminate {
                    step: TerminateStep::Begin,
                    request,
                },
                h.clock.now(),
            ))
            .await
            .unwrap();
    }

    fn user_request(stop_vm: bool, snapshot: Option<&str>) -> TerminationRequest {
        TerminationRequest {
            reason: TerminationReason::UserRequested,
            stop_vm,
            snapshot_name: snapshot.map(str::to_string),
            note: None,
        }
    }

    #[tokio::test]
    async fn ephemeral_expiry_deletes_connection_then_vm() {
        let h = Harness::new().await;
        let session = active_session(&h, SessionType::Ephemeral).await;
        request_termination(&h, &session, TerminationRequest::expiry()).await;

        assert_eq!(runtime(&h).drain("w1").await.unwrap(), 5);

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
        assert!(stored.gateway_connection_id.is_none());
        assert!(!h.hypervisor.has_vm(201));

        let log = h.log.lock().clone();
        let conn = log.iter().position(|c| c == "gw:delete_connection:c1").unwrap();
        let vm = log.iter().position(|c| c == "hv:delete_vm:201").unwrap();
        assert!(conn < vm);
    }

    #[tokio::test]
    async fn persistent_user_termination_stops_and_reverts() {
        let h = Harness::new().await;
        let session = active_session(&h, SessionType::Persistent).await;
        request_termination(&h, &session, user_request(true, Some("clean"))).await;

        runtime(&h).drain("w1").await.unwrap();

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Terminated);
        assert!(h.hypervisor.has_vm(201));
        assert!(!h.hypervisor.is_running(201));
        assert_eq!(h.calls("hv:rollback_snapshot"), vec!["hv:rollback_snapshot:201@clean"]);
        assert!(h.calls("hv:delete_vm").is_empty());
    }

    #[tokio::test]
    async fn snapshot_failure_is_ignored() {
        let h = Harness::new().await;
        let session = active_session(&h, SessionType::Persistent).await;
        h.hypervisor.fail("rollback_snapshot");
        request_termination(&h, &session, user_request(true, Some("clean"))).await;

        runtime(&h).drain("w1").await.unwrap();

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Terminated);
        assert!(h.notifier.alerts.lock().is_empty());
    }

    #[tokio::test]
    async fn snapshot_ignored_for_ephemeral() {
        let h = Harness::new().await;
        let session = active_session(&h, SessionType::Ephemeral).await;
        request_termination(&h, &session, user_request(true, Some("clean"))).await;

        runtime(&h).drain("w1").await.unwrap();
        assert!(h.calls("hv:rollback_snapshot").is_empty());
    }

    #[tokio::test]
    async fn keep_vm_when_not_requested() {
        let h = Harness::new().await;
        let session = active_session(&h, SessionType::Ephemeral).await;
        request_termination(&h, &session, user_request(false, None)).await;

        runtime(&h).drain("w1").await.unwrap();

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Terminated);
        assert!(h.hypervisor.has_vm(201));
        assert_eq!(h.calls("gw:delete_connection").len(), 1);
    }

    #[tokio::test]
    async fn gateway_failure_leaves_vm_untouched() {
        let h = Harness::new().await;
        let session = active_session(&h, SessionType::Ephemeral).await;
        h.gateway.fail("delete_connection");
        request_termination(&h, &session, TerminationRequest::expiry()).await;

        runtime(&h).drain("w1").await.unwrap();

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
        assert!(stored.status_note.unwrap().contains("수동 정리"));
        assert_eq!(h.calls("gw:delete_connection").len(), 3);
        assert!(h.calls("hv:delete_vm").is_empty());
        assert!(h.hypervisor.has_vm(201));

        let alerts = h.notifier.alerts.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::TerminationIncomplete);
    }

    #[tokio::test]
    async fn second_termination_is_noop() {
        let h = Harness::new().await;
        let session = active_session(&h, SessionType::Ephemeral).await;
        request_termination(&h, &session, TerminationRequest::expiry()).await;
        let rt = runtime(&h);
        rt.drain("w1").await.unwrap();
        let first = h.storage.find(session.id).await.unwrap().unwrap();

        request_termination(&h, &session, user_request(true, None)).await;
        assert_eq!(rt.drain("w1").await.unwrap(), 1);

        let second = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(second.status, SessionStatus::Expired);
        assert_eq!(second.updated_at, first.updated_at);
        assert_eq!(h.calls("hv:delete_vm").len(), 1);
        assert_eq!(h.calls("gw:delete_connection").len(), 1);
    }

    #[tokio::test]
    async fn persistent_vm_already_gone_still_terminates() {
        let h = Harness::new().await;
        let session = active_session(&h, SessionType::Persistent).await;
        h.hypervisor.state.lock().vms.remove(&201);
        request_termination(&h, &session, user_request(true, None)).await;

        runtime(&h).drain("w1").await.unwrap();

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Terminated);
        assert!(stored.status_note.is_none());
        assert_eq!(h.calls("hv:get_vm_status").len(), 1);
        assert!(h.calls("hv:stop_vm").is_empty());
        assert!(h.notifier.alerts.lock().is_empty());
    }
}
