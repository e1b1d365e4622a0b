//! 작업 큐 (WorkQueue 포트 구현).
//!
//! 여러 워커 프로세스가 같은 DB를 공유하므로 임대는 IMMEDIATE 트랜잭션 안에서
//! 선택과 갱신을 함께 수행한다. 같은 배타 키를 가진 작업이 `running`이면 건너뛴다.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};
use vmlease_core::error::CoreError;
use vmlease_core::models::session::SessionId;
use vmlease_core::models::task::{NewTask, Task, TaskKind};
use vmlease_core::ports::work_queue::WorkQueue;

use super::{db_err, parse_ts, ts, SqliteStorage};

/// 작업 요약 (운영 조회용)
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    /// 작업 ID
    pub id: i64,
    /// 작업 종류 라벨
    pub label: String,
    /// 상태 (queued/running/done/failed)
    pub state: String,
    /// 시도 횟수
    pub attempt: u32,
    /// 마지막 에러
    pub last_error: Option<String>,
}

impl SqliteStorage {
    /// 세션에 딸린 작업 이력 (생성순)
    pub fn tasks_for_session(&self, session_id: SessionId) -> Result<Vec<TaskRecord>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, kind, state, attempt, last_error FROM tasks \
                 WHERE session_id = ?1 ORDER BY id",
            )
            .map_err(db_err("작업 쿼리 준비 실패"))?;
        let rows = stmt
            .query_map([session_id.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(db_err("작업 조회 실패"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("작업 행 읽기 실패"))?;

        rows.into_iter()
            .map(|(id, kind, state, attempt, last_error)| {
                let kind: TaskKind = serde_json::from_str(&kind)?;
                Ok(TaskRecord {
                    id,
                    label: kind.label(),
                    state,
                    attempt,
                    last_error,
                })
            })
            .collect()
    }

    /// 상태 변경 공통 (running 작업만 대상)
    fn finish_task(
        &self,
        task_id: i64,
        state: &str,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE tasks SET state = ?2, last_error = COALESCE(?3, last_error), \
                 leased_by = NULL, lease_expires_at = NULL, finished_at = ?4 \
                 WHERE id = ?1 AND state = 'running'",
                params![task_id, state, error, ts(Utc::now())],
            )
            .map_err(db_err("작업 상태 갱신 실패"))?;

        if updated == 0 {
            return Err(CoreError::not_found("Task", task_id));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for SqliteStorage {
    async fn enqueue(&self, task: NewTask) -> Result<i64, CoreError> {
        let kind = serde_json::to_string(&task.kind)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (session_id, kind, state, attempt, run_at, exclusivity_key) \
             VALUES (?1, ?2, 'queued', 1, ?3, ?4)",
            params![
                task.session_id.to_string(),
                kind,
                ts(task.run_at),
                task.exclusivity_key,
            ],
        )
        .map_err(db_err("작업 추가 실패"))?;

        let id = conn.last_insert_rowid();
        debug!("작업 추가: id={id}, {}", task.kind.label());
        Ok(id)
    }

    async fn lease(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_for: Duration,
    ) -> Result<Option<Task>, CoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("트랜잭션 시작 실패"))?;

        let candidate = tx
            .query_row(
                "SELECT id, session_id, kind, attempt, run_at, exclusivity_key FROM tasks t \
                 WHERE t.state = 'queued' AND t.run_at <= ?1 \
                 AND (t.exclusivity_key IS NULL OR NOT EXISTS ( \
                     SELECT 1 FROM tasks r \
                     WHERE r.state = 'running' AND r.exclusivity_key = t.exclusivity_key)) \
                 ORDER BY t.run_at, t.id LIMIT 1",
                [ts(now)],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err("작업 임대 조회 실패"))?;

        let Some((id, session_id, kind, attempt, run_at, exclusivity_key)) = candidate else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE tasks SET state = 'running', leased_by = ?2, lease_expires_at = ?3 WHERE id = ?1",
            params![id, worker_id, ts(now + lease_for)],
        )
        .map_err(db_err("작업 임대 갱신 실패"))?;
        tx.commit().map_err(db_err("트랜잭션 커밋 실패"))?;

        Ok(Some(Task {
            id,
            session_id: session_id.parse()?,
            kind: serde_json::from_str(&kind)?,
            attempt,
            run_at: parse_ts(&run_at)?,
            exclusivity_key,
        }))
    }

    async fn renew_lease(
        &self,
        task_id: i64,
        worker_id: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE tasks SET lease_expires_at = ?3 \
                 WHERE id = ?1 AND state = 'running' AND leased_by = ?2",
                params![task_id, worker_id, ts(until)],
            )
            .map_err(db_err("작업 임대 연장 실패"))?;
        Ok(updated > 0)
    }

    async fn complete(&self, task_id: i64) -> Result<(), CoreError> {
        self.finish_task(task_id, "done", None)
    }

    async fn retry(
        &self,
        task_id: i64,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE tasks SET state = 'queued', attempt = attempt + 1, run_at = ?2, \
                 last_error = ?3, leased_by = NULL, lease_expires_at = NULL \
                 WHERE id = ?1 AND state = 'running'",
                params![task_id, ts(run_at), error],
            )
            .map_err(db_err("작업 재시도 예약 실패"))?;

        if updated == 0 {
            return Err(CoreError::not_found("Task", task_id));
        }
        Ok(())
    }

    async fn fail(&self, task_id: i64, error: &str) -> Result<(), CoreError> {
        self.finish_task(task_id, "failed", Some(error))
    }

    async fn recover_expired_leases(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        let recovered = conn
            .execute(
                "UPDATE tasks SET state = 'queued', leased_by = NULL, lease_expires_at = NULL \
                 WHERE state = 'running' AND lease_expires_at <= ?1",
                [ts(now)],
            )
            .map_err(db_err("만료 임대 복구 실패"))?;

        if recovered > 0 {
            info!("만료된 작업 임대 {recovered}건 복구");
        }
        Ok(recovered)
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        let purged = conn
            .execute(
                "DELETE FROM tasks WHERE state IN ('done', 'failed') AND finished_at < ?1",
                [ts(before)],
            )
            .map_err(db_err("완료 작업 삭제 실패"))?;

        if purged > 0 {
            info!("완료 작업 {purged}건 삭제");
        }
        Ok(purged)
    }
}
