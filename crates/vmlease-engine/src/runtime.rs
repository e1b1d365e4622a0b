//! 작업 런타임.
//!
//! 큐에서 작업을 임대해 종류별 처리기로 보내고, 결과에 따라
//! 다음 단계 추가 / 백오프 재시도 / 최종 실패 처리를 수행한다.
//!
//! 처리기는 (세션, 단계, 시도 횟수)만 보고 동작하며 스케줄링은 알지 못한다.
//! 처리기가 실행되는 동안 임대 시간의 1/3마다 임대를 연장해, 긴 폴링 단계가
//! 임대 복구로 다른 워커에게 넘어가지 않게 한다.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use vmlease_core::error::CoreError;
use vmlease_core::models::task::{NewTask, Task, TaskKind, TaskOutcome};
use vmlease_core::ports::clock::Clock;
use vmlease_core::ports::work_queue::WorkQueue;

/// 단계별 재시도 예산
#[derive(Debug, Clone, PartialEq)]
pub struct StepRetryPolicy {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// n번째 실패 후 대기 시간. 부족하면 마지막 값을 반복
    pub backoff: Vec<Duration>,
}

impl StepRetryPolicy {
    /// 설정 값(초 단위 백오프)으로 생성
    pub fn new(max_attempts: u32, backoff_secs: &[u64]) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: backoff_secs.iter().copied().map(Duration::from_secs).collect(),
        }
    }

    /// `attempt`번째 시도가 실패한 뒤의 대기 시간
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff.len() - 1);
        self.backoff[idx]
    }

    /// 더 이상 재시도할 수 없는지
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// 작업 종류별 처리기
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 단계 실행
    async fn run(&self, task: &Task) -> TaskOutcome;

    /// 재시도 소진 또는 재시도 불가 실패 후처리
    async fn on_exhausted(&self, task: &Task, error: &str);

    /// 재시도 예산
    fn retry_policy(&self) -> &StepRetryPolicy;
}

/// 에러를 작업 결과로 분류
pub fn outcome_for(error: &CoreError) -> TaskOutcome {
    if error.is_permanent() {
        TaskOutcome::Terminal(error.to_string())
    } else {
        TaskOutcome::Retryable(error.to_string())
    }
}

/// 종류별 처리기 묶음
#[derive(Clone)]
pub struct TaskHandlers {
    pub provisioning: Arc<dyn TaskHandler>,
    pub termination: Arc<dyn TaskHandler>,
    pub expiry: Arc<dyn TaskHandler>,
}

/// 작업 런타임
pub struct TaskRuntime {
    queue: Arc<dyn WorkQueue>,
    clock: Arc<dyn Clock>,
    handlers: TaskHandlers,
    lease_for: chrono::Duration,
    heartbeat: Duration,
}

impl TaskRuntime {
    /// 새 런타임 생성
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        clock: Arc<dyn Clock>,
        handlers: TaskHandlers,
        lease_for: chrono::Duration,
    ) -> Self {
        let heartbeat = (lease_for / 3)
            .to_std()
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_millis(10));
        Self {
            queue,
            clock,
            handlers,
            lease_for,
            heartbeat,
        }
    }

    /// 임대 연장 주기 설정
    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every.max(Duration::from_millis(1));
        self
    }

    fn handler_for(&self, kind: &TaskKind) -> &Arc<dyn TaskHandler> {
        match kind {
            TaskKind::Provision { .. } => &self.handlers.provisioning,
            TaskKind::Terminate { .. } => &self.handlers.termination,
            TaskKind::Expire => &self.handlers.expiry,
        }
    }

    /// 실행 가능한 작업 하나 처리. 처리한 작업이 없으면 `false`
    pub async fn run_once(&self, worker_id: &str) -> Result<bool, CoreError> {
        let Some(task) = self
            .queue
            .lease(worker_id, self.clock.now(), self.lease_for)
            .await?
        else {
            return Ok(false);
        };

        let label = task.kind.label();
        debug!(
            "작업 실행: #{} {label} (session={}, 시도 {})",
            task.id, task.session_id, task.attempt
        );

        let handler = self.handler_for(&task.kind);
        match self.run_with_heartbeat(handler.as_ref(), &task, worker_id).await {
            TaskOutcome::Completed { next } => {
                // 현재 작업이 배타 키를 잡고 있으므로 완료 전까지 다음 단계는 임대되지 않는다
                if let Some(kind) = next {
                    self.queue
                        .enqueue(NewTask::for_session(task.session_id, kind, self.clock.now()))
                        .await?;
                }
                self.queue.complete(task.id).await?;
            }
            TaskOutcome::Retryable(reason) => {
                let policy = handler.retry_policy();
                if policy.is_exhausted(task.attempt) {
                    warn!(
                        "작업 재시도 소진: #{} {label} ({}회): {reason}",
                        task.id, task.attempt
                    );
                    handler.on_exhausted(&task, &reason).await;
                    self.queue.fail(task.id, &reason).await?;
                } else {
                    let delay = policy.backoff_for(task.attempt);
                    let run_at = self.clock.now()
                        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                    info!(
                        "작업 재시도 예약: #{} {label} ({}초 후): {reason}",
                        task.id,
                        delay.as_secs()
                    );
                    self.queue.retry(task.id, run_at, &reason).await?;
                }
            }
            TaskOutcome::Terminal(reason) => {
                error!("작업 실패 (재시도 불가): #{} {label}: {reason}", task.id);
                handler.on_exhausted(&task, &reason).await;
                self.queue.fail(task.id, &reason).await?;
            }
        }

        Ok(true)
    }

    /// 처리기 실행. 끝날 때까지 주기적으로 임대를 연장한다
    async fn run_with_heartbeat(
        &self,
        handler: &dyn TaskHandler,
        task: &Task,
        worker_id: &str,
    ) -> TaskOutcome {
        let run = handler.run(task);
        tokio::pin!(run);

        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 첫 tick은 즉시 완료된다
        ticker.tick().await;

        loop {
            tokio::select! {
                outcome = &mut run => return outcome,
                _ = ticker.tick() => self.renew_lease(task, worker_id).await,
            }
        }
    }

    async fn renew_lease(&self, task: &Task, worker_id: &str) {
        let until = self.clock.now() + self.lease_for;
        match self.queue.renew_lease(task.id, worker_id, until).await {
            Ok(true) => debug!("작업 임대 연장: #{} → {until}", task.id),
            Ok(false) => warn!(
                "작업 임대를 잃음: #{} {} ({worker_id})",
                task.id,
                task.kind.label()
            ),
            Err(e) => warn!("작업 임대 연장 실패: #{}: {e}", task.id),
        }
    }

    /// 지금 실행 가능한 작업이 없을 때까지 처리 → 처리 건수
    pub async fn drain(&self, worker_id: &str) -> Result<usize, CoreError> {
        let mut processed = 0;
        while self.run_once(worker_id).await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// 워커 루프 (종료 신호까지)
    pub async fn run_worker(
        self: Arc<Self>,
        worker_id: String,
        idle_poll: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("작업 워커 시작: {worker_id}");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once(&worker_id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!("작업 처리 에러 ({worker_id}): {e}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(idle_poll) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("작업 워커 종료: {worker_id}");
    }
}
