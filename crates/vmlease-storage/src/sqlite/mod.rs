//! SQLite 저장소 어댑터.
//!
//! 저장소 포트 + `WorkQueue` 포트 구현.
//!
//! # 모듈 구조
//! - `sessions`: 세션 저장 및 용량/쿼터 집계 (SessionRepository 포트)
//! - `inventory`: 클러스터, 노드, 템플릿 (Cluster/Node/TemplateRepository 포트)
//! - `tasks`: 파이프라인 작업 큐 (WorkQueue 포트)

mod inventory;
mod sessions;
mod tasks;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use vmlease_core::error::CoreError;

use crate::migration;

/// SQLite 저장소
#[derive(Debug)]
pub struct SqliteStorage {
    pub(super) conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// 파일 기반 SQLite 저장소 생성
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| CoreError::Storage(format!("SQLite 열기 실패: {e}")))?;

        // 여러 워커 프로세스가 같은 DB 파일을 공유한다
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            PRAGMA temp_store=MEMORY;
            ",
        )
        .map_err(|e| CoreError::Storage(format!("PRAGMA 설정 실패: {e}")))?;

        migration::run_migrations(&conn)
            .map_err(|e| CoreError::Storage(format!("마이그레이션 실패: {e}")))?;

        info!("SQLite 저장소 초기화: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 인메모리 SQLite 저장소 생성 (테스트용)
    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::Storage(format!("인메모리 SQLite 생성 실패: {e}")))?;

        migration::run_migrations(&conn)
            .map_err(|e| CoreError::Storage(format!("마이그레이션 실패: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 연결 잠금
    pub(super) fn lock(&self) -> Result<MutexGuard<'_, Connection>, CoreError> {
        self.conn
            .lock()
            .map_err(|e| CoreError::Storage(format!("잠금 획득 실패: {e}")))
    }
}

/// 시각 → 고정 폭 RFC3339 문자열 (사전순 = 시간순)
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// RFC3339 문자열 → 시각
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::Storage(format!("시각 파싱 실패 '{raw}': {e}")))
}

/// rusqlite 에러 → `CoreError::Storage`
pub(crate) fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> CoreError {
    move |e| CoreError::Storage(format!("{context}: {e}"))
}
