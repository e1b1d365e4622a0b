//! 주기 작업 스케줄러.
//!
//! 만료 스윕, 임대 복구, 노드 동기화, 완료 작업 정리, 뷰어 제한기 정리를 각각 독립 루프로 돌린다.

use chrono::Duration as ChronoDuration;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vmlease_core::config::WorkerConfig;
use vmlease_core::error::CoreError;
use vmlease_engine::Engine;

/// 뷰어 제한기 정리 간격
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// 완료 작업 정리 간격
const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// 스케줄러 설정
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 만료 스윕 간격
    pub expiry_sweep_interval: Duration,
    /// 임대 복구 간격
    pub lease_recovery_interval: Duration,
    /// 노드 동기화 간격
    pub node_sync_interval: Duration,
    /// 완료 작업 정리 간격
    pub purge_interval: Duration,
    /// 완료 작업 보존 기간 (일)
    pub task_retention_days: u32,
}

impl SchedulerConfig {
    pub fn from_worker(config: &WorkerConfig) -> Self {
        Self {
            expiry_sweep_interval: Duration::from_secs(config.expiry_sweep_secs.max(1)),
            lease_recovery_interval: Duration::from_secs(config.lease_recovery_secs.max(1)),
            node_sync_interval: Duration::from_secs(config.node_sync_secs.max(1)),
            purge_interval: PURGE_INTERVAL,
            task_retention_days: config.task_retention_days,
        }
    }
}

/// 주기 작업 스케줄러
pub struct Scheduler {
    config: SchedulerConfig,
    engine: Arc<Engine>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, engine: Arc<Engine>) -> Self {
        Self { config, engine }
    }

    /// 모든 루프 시작 → (이름, 핸들) 목록
    pub fn spawn(&self, shutdown_rx: watch::Receiver<bool>) -> Vec<(&'static str, JoinHandle<()>)> {
        info!(
            "스케줄러 시작: 만료 스윕={}초, 임대 복구={}초, 노드 동기화={}초, 정리={}초",
            self.config.expiry_sweep_interval.as_secs(),
            self.config.lease_recovery_interval.as_secs(),
            self.config.node_sync_interval.as_secs(),
            self.config.purge_interval.as_secs(),
        );

        let mut handles = Vec::new();

        // 1. 만료 스윕
        let sweeper = self.engine.sweeper.clone();
        handles.push((
            "expiry-sweep",
            spawn_periodic(
                "만료 스윕",
                self.config.expiry_sweep_interval,
                shutdown_rx.clone(),
                move || {
                    let sweeper = sweeper.clone();
                    async move { sweeper.sweep().await }
                },
            ),
        ));

        // 2. 임대 복구 (죽은 워커의 작업 회수)
        let ctx = self.engine.ctx.clone();
        handles.push((
            "lease-recovery",
            spawn_periodic(
                "임대 복구",
                self.config.lease_recovery_interval,
                shutdown_rx.clone(),
                move || {
                    let ctx = ctx.clone();
                    async move { ctx.queue.recover_expired_leases(ctx.clock.now()).await }
                },
            ),
        ));

        // 3. 노드 인벤토리 동기화
        let inventory = self.engine.inventory.clone();
        handles.push((
            "node-sync",
            spawn_periodic(
                "노드 동기화",
                self.config.node_sync_interval,
                shutdown_rx.clone(),
                move || {
                    let inventory = inventory.clone();
                    async move { inventory.sync_all().await }
                },
            ),
        ));

        // 4. 완료 작업 정리
        let ctx = self.engine.ctx.clone();
        let retention = ChronoDuration::days(i64::from(self.config.task_retention_days));
        handles.push((
            "task-purge",
            spawn_periodic(
                "완료 작업 정리",
                self.config.purge_interval,
                shutdown_rx.clone(),
                move || {
                    let ctx = ctx.clone();
                    async move { ctx.queue.purge_finished(ctx.clock.now() - retention).await }
                },
            ),
        ));

        // 5. 뷰어 제한기 정리
        let sessions = self.engine.sessions.clone();
        handles.push((
            "limiter-prune",
            spawn_periodic(
                "뷰어 제한기 정리",
                LIMITER_PRUNE_INTERVAL,
                shutdown_rx,
                move || {
                    let sessions = sessions.clone();
                    async move {
                        sessions.prune_rate_limits();
                        Ok(0)
                    }
                },
            ),
        ));

        handles
    }
}

/// `period`마다 `job` 실행. 실패는 경고만 남기고 다음 주기에 다시 시도한다
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize, CoreError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match job().await {
                        Ok(0) => {}
                        Ok(count) => debug!("{name}: {count}건 처리"),
                        Err(e) => warn!("{name} 실패: {e}"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("{name} 루프 종료");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn intervals_from_worker_config() {
        let config = SchedulerConfig::from_worker(&WorkerConfig {
            expiry_sweep_secs: 0,
            ..WorkerConfig::default()
        });
        assert_eq!(config.expiry_sweep_interval, Duration::from_secs(1));
        assert_eq!(config.purge_interval, PURGE_INTERVAL);
    }

    #[tokio::test]
    async fn periodic_job_runs_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let handle = spawn_periodic("테스트", Duration::from_millis(10), rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::Internal("실패해도 계속".to_string()))
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
