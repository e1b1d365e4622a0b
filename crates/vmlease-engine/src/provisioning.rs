//! 프로비저닝 파이프라인.
//!
//! pending → provisioning → active 로 가는 단계들을 처리한다.
//!
//! 1. Begin: provisioning 전이
//! 2. Clone: VMID 할당 후 세션에 즉시 기록, 템플릿 클론
//! 3. Boot: VM 시작
//! 4. WaitRunning: running 상태까지 폴링
//! 5. ResolveIp: 게스트 IP 확인
//! 6. Connect: 게이트웨이 연결 생성, active 전이
//!
//! 각 단계는 재실행되어도 안전하다. 재시도가 소진되면 세션을 failed로 표시하고
//! 운영자에게 알린 뒤, 설정에 따라 만들어 둔 VM과 연결을 정리한다.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vmlease_core::config::ProvisioningConfig;
use vmlease_core::error::CoreError;
use vmlease_core::models::session::{Session, SessionId, SessionStatus};
use vmlease_core::models::task::{ProvisionStep, Task, TaskKind, TaskOutcome};
use vmlease_core::ports::gateway::ConnectionSpec;
use vmlease_core::ports::hypervisor::HypervisorApi;
use vmlease_core::ports::notifier::AlertKind;

use crate::context::EngineContext;
use crate::ip_resolver::{elapsed_secs, pause_before, wait_budget, IpResolver};
use crate::runtime::{outcome_for, StepRetryPolicy, TaskHandler};
use crate::vmid::VmidAllocator;

/// 프로비저닝 단계 처리기
pub struct ProvisioningPipeline {
    ctx: EngineContext,
    vmids: Arc<VmidAllocator>,
    ip_resolver: IpResolver,
    config: ProvisioningConfig,
    policy: StepRetryPolicy,
}

impl ProvisioningPipeline {
    /// 새 처리기 생성
    pub fn new(ctx: EngineContext, vmids: Arc<VmidAllocator>, config: ProvisioningConfig) -> Self {
        let ip_resolver = IpResolver::from_config(ctx.clock.clone(), &config);
        let policy = StepRetryPolicy::new(config.max_attempts, &config.backoff_secs);
        Self {
            ctx,
            vmids,
            ip_resolver,
            config,
            policy,
        }
    }

    /// 세션별 VM 이름 (하이퍼바이저 이름 규칙: 영숫자와 하이픈)
    fn vm_name(&self, session: &Session) -> String {
        let simple = session.id.0.simple().to_string();
        // UUIDv7 앞부분은 시각이므로 뒤쪽 무작위 부분을 사용
        let suffix = &simple[simple.len() - 12..];
        format!("{}-{suffix}", self.config.vm_name_prefix)
    }

    /// 단계 실행 → 다음 단계
    ///
    /// 세션이 더 이상 프로비저닝 대상이 아니면 (종료 요청 등) `None`을 반환해 체인을 멈춘다.
    async fn run_step(
        &self,
        session_id: SessionId,
        step: ProvisionStep,
    ) -> Result<Option<ProvisionStep>, CoreError> {
        let mut session = self.ctx.load_session(session_id).await?;
        if !matches!(
            session.status,
            SessionStatus::Pending | SessionStatus::Provisioning
        ) {
            info!(
                "프로비저닝 중단: session={session_id} 상태 '{}' ({step:?})",
                session.status
            );
            return Ok(None);
        }

        match step {
            ProvisionStep::Begin => {
                session.transition(SessionStatus::Provisioning, self.ctx.clock.now());
                self.ctx.sessions.save(&session).await?;
            }
            ProvisionStep::Clone => self.clone_vm(&mut session).await?,
            ProvisionStep::Boot => {
                let api = self.ctx.hypervisor_for(&session).await?;
                let vm_id = require_vm(&session)?;
                let status = api.get_vm_status(&session.node, vm_id).await?;
                if status.is_running() {
                    debug!("VM 이미 실행 중: vm={vm_id}");
                } else {
                    api.start_vm(&session.node, vm_id).await?;
                    info!("VM 시작 요청: session={session_id}, vm={vm_id}");
                }
            }
            ProvisionStep::WaitRunning => {
                let api = self.ctx.hypervisor_for(&session).await?;
                self.wait_until_running(api.as_ref(), &session).await?;
            }
            ProvisionStep::ResolveIp => {
                let api = self.ctx.hypervisor_for(&session).await?;
                let vm_id = require_vm(&session)?;
                let ip = self
                    .ip_resolver
                    .resolve(api.as_ref(), &session.node, vm_id)
                    .await?;
                session.guest_ip = Some(ip);
                session.updated_at = self.ctx.clock.now();
                self.ctx.sessions.save(&session).await?;
            }
            ProvisionStep::Connect => self.connect(&mut session).await?,
        }

        Ok(step.next())
    }

    async fn clone_vm(&self, session: &mut Session) -> Result<(), CoreError> {
        let template = self
            .ctx
            .templates
            .find_template(session.template_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Template", session.template_id))?;
        let api = self.ctx.hypervisor_for(session).await?;
        let name = self.vm_name(session);

        // 재시도: 이전 시도에서 기록한 VMID가 실제로 이 세션의 VM인지 확인
        if let Some(vm_id) = session.vm_id {
            match api.get_vm_status(&session.node, vm_id).await {
                Ok(status) if status.name.as_deref() == Some(name.as_str()) => {
                    info!("이미 클론된 VM 재사용: session={}, vm={vm_id}", session.id);
                    return Ok(());
                }
                Ok(_) => {
                    warn!("VMID 충돌, 새 번호 할당: session={}, vm={vm_id}", session.id);
                    session.vm_id = None;
                }
                Err(CoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let vm_id = match session.vm_id {
            Some(id) => id,
            None => self.vmids.assign(session, self.ctx.clock.now()).await?,
        };

        api.clone_template(template.hypervisor_template_id, &session.node, vm_id, &name)
            .await?;
        info!(
            "템플릿 클론 완료: session={}, template={}, vm={vm_id}@{}",
            session.id, template.hypervisor_template_id, session.node
        );
        Ok(())
    }

    async fn wait_until_running(
        &self,
        api: &dyn HypervisorApi,
        session: &Session,
    ) -> Result<(), CoreError> {
        let vm_id = require_vm(session)?;
        let interval = Duration::from_secs(self.config.boot_poll_interval_secs);
        let started = self.ctx.clock.now();
        let deadline = started + wait_budget(Duration::from_secs(self.config.boot_timeout_secs))?;
        let mut poll = 0u32;

        loop {
            poll += 1;
            if api.get_vm_status(&session.node, vm_id).await?.is_running() {
                debug!("VM running 확인: vm={vm_id} ({poll}회째)");
                return Ok(());
            }
            let Some(pause) = pause_before(self.ctx.clock.now(), deadline, interval) else {
                break;
            };
            self.ctx.clock.sleep(pause).await;
        }

        Err(CoreError::PipelineTimeout {
            what: format!("VM {vm_id} running"),
            waited_secs: elapsed_secs(started, self.ctx.clock.now()),
        })
    }

    async fn connect(&self, session: &mut Session) -> Result<(), CoreError> {
        if session.gateway_connection_id.is_none() {
            let template = self
                .ctx
                .templates
                .find_template(session.template_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Template", session.template_id))?;
            let ip = session
                .guest_ip
                .clone()
                .ok_or_else(|| CoreError::Internal(format!("게스트 IP 없음: {}", session.id)))?;

            let spec = ConnectionSpec {
                name: format!("{}-{}", template.name, session.id),
                protocol: template.protocol,
                parameters: template.connection_parameters(&ip),
            };
            let connection_id = self.ctx.gateway.create_connection(&spec).await?;

            // 연결 ID를 먼저 저장해 두면 이후 저장이 실패해도 정리 대상에서 빠지지 않는다
            session.gateway_connection_id = Some(connection_id.clone());
            session.updated_at = self.ctx.clock.now();
            if let Err(e) = self.ctx.sessions.save(session).await {
                // 기록되지 않은 연결은 종료 파이프라인이 찾을 수 없다
                if let Err(cleanup) = self.ctx.gateway.delete_connection(&connection_id).await {
                    warn!("기록 실패한 연결 정리 실패: {connection_id}: {cleanup}");
                }
                return Err(e);
            }
        }

        session.transition(SessionStatus::Active, self.ctx.clock.now());
        self.ctx.sessions.save(session).await?;
        info!(
            "세션 활성화: session={}, vm={:?}, ip={:?}",
            session.id, session.vm_id, session.guest_ip
        );
        Ok(())
    }

    /// 실패 시 만들어 둔 자원 정리 (최선 노력)
    async fn cleanup(&self, session: &Session) {
        if let Some(connection_id) = &session.gateway_connection_id {
            if let Err(e) = self.ctx.gateway.delete_connection(connection_id).await {
                warn!("실패 세션 연결 정리 실패: {connection_id}: {e}");
            }
        }

        let Some(vm_id) = session.vm_id else {
            return;
        };
        match self.ctx.hypervisor_for(session).await {
            Ok(api) => {
                if let Err(e) = api.delete_vm(&session.node, vm_id).await {
                    warn!("실패 세션 VM 정리 실패: vm={vm_id}: {e}");
                }
            }
            Err(e) => warn!("실패 세션 VM 정리 불가: vm={vm_id}: {e}"),
        }
    }
}

fn require_vm(session: &Session) -> Result<u32, CoreError> {
    session
        .vm_id
        .ok_or_else(|| CoreError::Internal(format!("VMID 미할당 세션: {}", session.id)))
}

#[async_trait]
impl TaskHandler for ProvisioningPipeline {
    async fn run(&self, task: &Task) -> TaskOutcome {
        let TaskKind::Provision { step } = task.kind else {
            return TaskOutcome::Terminal(format!("잘못된 작업 종류: {}", task.kind.label()));
        };

        match self.run_step(task.session_id, step).await {
            Ok(Some(next)) => TaskOutcome::then(TaskKind::Provision { step: next }),
            Ok(None) => TaskOutcome::done(),
            Err(CoreError::InvalidState { status, .. }) => {
                info!(
                    "프로비저닝 중단 (세션이 '{status}'로 바뀜): session={}, {step:?}",
                    task.session_id
                );
                TaskOutcome::done()
            }
            Err(e) => {
                warn!(
                    "프로비저닝 단계 실패: session={}, {step:?} (시도 {}): {e}",
                    task.session_id, task.attempt
                );
                outcome_for(&e)
            }
        }
    }

    async fn on_exhausted(&self, task: &Task, error: &str) {
        let mut session = match self.ctx.load_session(task.session_id).await {
            Ok(session) => session,
            Err(e) => {
                error!("실패 처리 대상 세션 조회 실패: {}: {e}", task.session_id);
                return;
            }
        };
        if !matches!(
            session.status,
            SessionStatus::Pending | SessionStatus::Provisioning
        ) {
            return;
        }

        let note = format!("프로비저닝 실패 ({}): {error}", task.kind.label());
        session.status_note = Some(note.clone());
        session.transition(SessionStatus::Failed, self.ctx.clock.now());
        match self.ctx.sessions.save(&session).await {
            Ok(()) => {}
            Err(CoreError::InvalidState { status, .. }) => {
                // 종료 파이프라인이 자원을 정리한다
                info!("실패 처리 생략: session={} 이미 '{status}'", session.id);
                return;
            }
            Err(e) => error!("세션 실패 상태 저장 실패: {}: {e}", session.id),
        }

        if self.config.cleanup_on_failure {
            self.cleanup(&session).await;
        }

        error!("세션 프로비저닝 실패: session={}: {note}", session.id);
        self.ctx
            .alert(AlertKind::ProvisioningFailed, session.id, note)
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
    use vmlease_core::models::session::SessionType;
    use vmlease_core::models::task::NewTask;
    use vmlease_core::ports::clock::Clock;
    use vmlease_core::ports::repository::SessionRepository;
    use vmlease_core::ports::work_queue::WorkQueue;

    /// 프로비저닝만 처리하는 런타임 (종료/만료 처리기는 같은 인스턴스로 채움)
    fn runtime(h: &Harness, config: ProvisioningConfig) -> TaskRuntime {
        let ctx = h.context();
        let vmids = Arc::new(VmidAllocator::new(
            ctx.sessions.clone(),
            config.vmid_min,
            config.vmid_max,
        ));
        let pipeline: Arc<dyn TaskHandler> =
            Arc::new(ProvisioningPipeline::new(ctx.clone(), vmids, config));
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

    fn fast_config() -> ProvisioningConfig {
        ProvisioningConfig {
            backoff_secs: vec![0],
            ..ProvisioningConfig::default()
        }
    }

    async fn pending_session(h: &Harness) -> Session {
        let session = Session::new_pending(
            "alice",
            h.template.id,
            h.cluster.id,
            "pve1",
            SessionType::Ephemeral,
            h.clock.now(),
            60,
        );
        h.storage.insert(&session).await.unwrap();
        h.storage
            .enqueue(NewTask::for_session(
                session.id,
                TaskKind::Provision {
                    step: ProvisionStep::Begin,
                },
                h.clock.now(),
            ))
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn happy_path_activates_session() {
        let h = Harness::new().await;
        h.hypervisor.state.lock().polls_until_ip = 1;
        let session = pending_session(&h).await;

        let rt = runtime(&h, fast_config());
        assert_eq!(rt.drain("w1").await.unwrap(), 6);

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert_eq!(stored.vm_id, Some(200));
        assert_eq!(stored.guest_ip.as_deref(), Some("10.0.0.15"));
        assert_eq!(stored.gateway_connection_id.as_deref(), Some("c1"));
        assert!(h.hypervisor.is_running(200));

        let spec = h.gateway.connections.lock().get("c1").cloned().unwrap();
        assert_eq!(spec.parameters.get("hostname").map(String::as_str), Some("10.0.0.15"));
        assert_eq!(spec.parameters.get("port").map(String::as_str), Some("3389"));
        assert!(h.notifier.alerts.lock().is_empty());
    }

    #[tokio::test]
    async fn clone_retry_reuses_recorded_vm() {
        let h = Harness::new().await;
        let session = pending_session(&h).await;
        let rt = runtime(&h, fast_config());

        // Begin 후 clone 실패 → VMID는 이미 기록됨
        h.hypervisor.fail("clone_template");
        rt.run_once("w1").await.unwrap();
        rt.run_once("w1").await.unwrap();
        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.vm_id, Some(200));

        h.hypervisor.heal("clone_template");
        rt.drain("w1").await.unwrap();
        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert_eq!(stored.vm_id, Some(200));
        assert_eq!(h.calls("hv:clone_template").len(), 2);
    }

    #[tokio::test]
    async fn exhausted_pipeline_marks_failed_and_cleans_up() {
        let h = Harness::new().await;
        let session = pending_session(&h).await;
        h.gateway.fail("create_connection");

        let rt = runtime(&h, fast_config());
        rt.drain("w1").await.unwrap();

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert!(stored
            .status_note
            .as_deref()
            .unwrap()
            .contains("provision/Connect"));
        assert_eq!(h.calls("gw:create_connection").len(), 3);
        assert!(!h.hypervisor.has_vm(200));

        let alerts = h.notifier.alerts.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::ProvisioningFailed);
    }

    #[tokio::test]
    async fn cleanup_can_be_disabled() {
        let h = Harness::new().await;
        pending_session(&h).await;
        h.gateway.fail("create_connection");

        let config = ProvisioningConfig {
            cleanup_on_failure: false,
            ..fast_config()
        };
        runtime(&h, config).drain("w1").await.unwrap();
        assert!(h.hypervisor.has_vm(200));
    }

    #[tokio::test]
    async fn boot_timeout_polls_until_deadline() {
        let h = Harness::new().await;
        h.hypervisor.state.lock().polls_until_running = u32::MAX;
        let session = pending_session(&h).await;

        let config = ProvisioningConfig {
            max_attempts: 1,
            boot_poll_interval_secs: 5,
            boot_timeout_secs: 20,
            ..fast_config()
        };
        runtime(&h, config).drain("w1").await.unwrap();

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert!(stored.status_note.unwrap().contains("running"));
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(5); 4]);
    }

    #[tokio::test]
    async fn boot_wait_counts_slow_status_calls() {
        let h = Harness::new().await;
        h.hypervisor.state.lock().polls_until_running = u32::MAX;
        let session = pending_session(&h).await;

        let config = ProvisioningConfig {
            max_attempts: 1,
            boot_poll_interval_secs: 5,
            boot_timeout_secs: 20,
            cleanup_on_failure: false,
            ..fast_config()
        };
        let rt = runtime(&h, config);
        // Begin, Clone, Boot
        for _ in 0..3 {
            rt.run_once("w1").await.unwrap();
        }
        h.hypervisor
            .slow_down(h.clock.clone(), chrono::Duration::seconds(30));
        let before = h.clock.now();
        rt.drain("w1").await.unwrap();

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert!(stored.status_note.unwrap().contains("running"));
        // 첫 조회가 30초 걸려 마감(20초)을 넘겼으므로 더 기다리지 않는다
        assert!(h.clock.sleeps().is_empty());
        assert_eq!(h.clock.now() - before, chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn exhausted_vmid_range_fails_without_retry() {
        let h = Harness::new().await;
        let session = pending_session(&h).await;

        let config = ProvisioningConfig {
            vmid_min: 200,
            vmid_max: 200,
            ..fast_config()
        };
        let mut blocker = Session::new_pending(
            "bob",
            h.template.id,
            h.cluster.id,
            "pve2",
            SessionType::Ephemeral,
            h.clock.now(),
            60,
        );
        blocker.vm_id = Some(200);
        blocker.status = SessionStatus::Expired;
        h.storage.insert(&blocker).await.unwrap();

        runtime(&h, config).drain("w1").await.unwrap();

        let stored = h.storage.find(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert!(h.calls("hv:clone_template").is_empty());
        let records = h.storage.tasks_for_session(session.id).unwrap();
        let clone = records.iter().find(|r| r.label == "provision/Clone").unwrap();
        assert_eq!(clone.attempt, 1);
        assert_eq!(clone.state, "failed");
    }

    #[tokio::test]
    async fn terminating_session_stops_chain() {
        let h = Harness::new().await;
        let mut session = pending_session(&h).await;
        session.transition(SessionStatus::Expiring, h.clock.now());
        h.storage.save(&session).await.unwrap();

        assert_eq!(runtime(&h, fast_config()).drain("w1").await.unwrap(), 1);
        assert!(h.calls("hv:").is_empty());
    }
}
