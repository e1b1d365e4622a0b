//! 작업 큐 포트.
//!
//! 구현: `vmlease-storage` crate (SQLite `tasks` 테이블)
//!
//! 전달은 at-least-once. 같은 배타 키를 가진 작업은 동시에 임대되지 않는다.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::CoreError;
use crate::models::task::{NewTask, Task};

/// 내구성 작업 큐
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// 작업 추가 → 작업 ID
    async fn enqueue(&self, task: NewTask) -> Result<i64, CoreError>;

    /// 실행 가능한 작업 하나를 임대
    ///
    /// `run_at <= now`이고 배타 키가 다른 실행 중 작업에 잡혀 있지 않은 작업 중
    /// 가장 오래된 것을 반환한다.
    async fn lease(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_for: Duration,
    ) -> Result<Option<Task>, CoreError>;

    /// 실행 중인 작업의 임대 연장 (하트비트)
    ///
    /// 작업이 더 이상 `worker_id`의 임대가 아니면 `false`.
    async fn renew_lease(
        &self,
        task_id: i64,
        worker_id: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// 완료 처리 (배타 키 해제)
    async fn complete(&self, task_id: i64) -> Result<(), CoreError>;

    /// 재시도 예약 (시도 횟수 +1, 배타 키 해제)
    async fn retry(&self, task_id: i64, run_at: DateTime<Utc>, error: &str)
        -> Result<(), CoreError>;

    /// 최종 실패 처리 (배타 키 해제)
    async fn fail(&self, task_id: i64, error: &str) -> Result<(), CoreError>;

    /// 임대가 만료된 작업을 다시 대기 상태로 (워커 비정상 종료 복구)
    async fn recover_expired_leases(&self, now: DateTime<Utc>) -> Result<usize, CoreError>;

    /// 오래된 완료/실패 작업 삭제
    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, CoreError>;
}
