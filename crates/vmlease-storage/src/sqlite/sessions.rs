//! 세션 저장소 (SessionRepository 포트 구현).
//!
//! 노드/클러스터 용량과 사용자 쿼터는 저장된 집계 값 없이 매번 조회한다.
//!
//! 갱신은 저장된 상태에서 새 상태로의 전이가 허용될 때만 적용된다. 오래된 사본이
//! expiring/종료 상태를 이전 상태로 되돌리는 쓰기는 `InvalidState`로 거부된다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;
use vmlease_core::error::CoreError;
use vmlease_core::models::cluster::ClusterId;
use vmlease_core::models::session::{Session, SessionId, SessionStatus};
use vmlease_core::models::template::TemplateId;
use vmlease_core::ports::repository::SessionRepository;

use super::{db_err, parse_ts, ts, SqliteStorage};

const SESSION_COLUMNS: &str = "id, user_id, template_id, cluster_id, node, vm_id, guest_ip, \
     gateway_connection_id, status, session_type, expires_at, status_note, created_at, updated_at";

/// DB 행 (문자열 컬럼은 변환 전)
struct SessionRow {
    id: String,
    user_id: String,
    template_id: i64,
    cluster_id: i64,
    node: String,
    vm_id: Option<u32>,
    guest_ip: Option<String>,
    gateway_connection_id: Option<String>,
    status: String,
    session_type: String,
    expires_at: String,
    status_note: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            template_id: row.get(2)?,
            cluster_id: row.get(3)?,
            node: row.get(4)?,
            vm_id: row.get(5)?,
            guest_ip: row.get(6)?,
            gateway_connection_id: row.get(7)?,
            status: row.get(8)?,
            session_type: row.get(9)?,
            expires_at: row.get(10)?,
            status_note: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_session(self) -> Result<Session, CoreError> {
        Ok(Session {
            id: self.id.parse()?,
            user_id: self.user_id,
            template_id: TemplateId(self.template_id),
            cluster_id: ClusterId(self.cluster_id),
            node: self.node,
            vm_id: self.vm_id,
            guest_ip: self.guest_ip,
            gateway_connection_id: self.gateway_connection_id,
            status: self.status.parse()?,
            session_type: self.session_type.parse()?,
            expires_at: parse_ts(&self.expires_at)?,
            status_note: self.status_note,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// 조건을 만족하는 상태들의 SQL IN 목록
fn status_list(include: fn(SessionStatus) -> bool) -> String {
    SessionStatus::ALL
        .into_iter()
        .filter(|s| include(*s))
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

/// `next`로 갱신할 수 있는 저장 상태들의 SQL IN 목록
fn statuses_preceding(next: SessionStatus) -> String {
    SessionStatus::ALL
        .into_iter()
        .filter(|stored| *stored == next || stored.can_transition_to(next))
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

impl SqliteStorage {
    /// 세션 갱신 공통. `seen_updated_at`이 있으면 그 뒤로 바뀐 행은 갱신하지 않는다
    fn update_session(
        &self,
        session: &Session,
        seen_updated_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                &format!(
                    "UPDATE sessions SET node = ?2, vm_id = ?3, guest_ip = ?4, \
                     gateway_connection_id = ?5, status = ?6, expires_at = ?7, status_note = ?8, \
                     updated_at = ?9 WHERE id = ?1 AND status IN ({}) \
                     AND (?10 IS NULL OR updated_at = ?10)",
                    statuses_preceding(session.status)
                ),
                params![
                    session.id.to_string(),
                    session.node,
                    session.vm_id,
                    session.guest_ip,
                    session.gateway_connection_id,
                    session.status.as_str(),
                    ts(session.expires_at),
                    session.status_note,
                    ts(session.updated_at),
                    seen_updated_at.map(ts),
                ],
            )
            .map_err(db_err("세션 갱신 실패"))?;

        if updated > 0 {
            return Ok(());
        }

        let stored: Option<String> = conn
            .query_row(
                "SELECT status FROM sessions WHERE id = ?1",
                [session.id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("세션 상태 조회 실패"))?;
        match stored {
            Some(status) => {
                debug!(
                    "세션 갱신 거부 (다른 쓰기와 충돌): {} 저장 상태 '{status}' → '{}'",
                    session.id, session.status
                );
                Err(CoreError::InvalidState {
                    session_id: session.id.to_string(),
                    status,
                    action: format!("'{}' 상태로 갱신", session.status),
                })
            }
            None => Err(CoreError::not_found("Session", session.id)),
        }
    }

    /// 세션 목록 조회 공통
    fn query_sessions(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Session>, CoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE {where_clause}");
        let mut stmt = conn.prepare(&sql).map_err(db_err("세션 쿼리 준비 실패"))?;
        let rows = stmt
            .query_map(params, SessionRow::from_row)
            .map_err(db_err("세션 조회 실패"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("세션 행 읽기 실패"))?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }
}

#[async_trait]
impl SessionRepository for SqliteStorage {
    async fn insert(&self, session: &Session) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO sessions ({SESSION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                session.id.to_string(),
                session.user_id,
                session.template_id.0,
                session.cluster_id.0,
                session.node,
                session.vm_id,
                session.guest_ip,
                session.gateway_connection_id,
                session.status.as_str(),
                session.session_type.as_str(),
                ts(session.expires_at),
                session.status_note,
                ts(session.created_at),
                ts(session.updated_at),
            ],
        )
        .map_err(db_err("세션 저장 실패"))?;

        debug!("세션 저장: {} ({})", session.id, session.status);
        Ok(())
    }

    async fn save(&self, session: &Session) -> Result<(), CoreError> {
        self.update_session(session, None)
    }

    async fn save_if_unchanged(
        &self,
        session: &Session,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.update_session(session, Some(seen_updated_at))
    }

    async fn find(&self, id: SessionId) -> Result<Option<Session>, CoreError> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                [id.to_string()],
                SessionRow::from_row,
            )
            .optional()
            .map_err(db_err("세션 조회 실패"))?
        };
        row.map(SessionRow::into_session).transpose()
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>, CoreError> {
        self.query_sessions("user_id = ?1 ORDER BY created_at DESC, id DESC", params![user_id])
    }

    async fn list_active_by_user(&self, user_id: &str) -> Result<Vec<Session>, CoreError> {
        let clause = format!(
            "user_id = ?1 AND status IN ({}) ORDER BY created_at",
            status_list(SessionStatus::counts_toward_quota)
        );
        self.query_sessions(&clause, params![user_id])
    }

    async fn count_active_on_node(
        &self,
        cluster_id: ClusterId,
        node: &str,
    ) -> Result<u32, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM sessions WHERE cluster_id = ?1 AND node = ?2 AND status IN ({})",
                status_list(SessionStatus::occupies_capacity)
            ),
            params![cluster_id.0, node],
            |row| row.get(0),
        )
        .map_err(db_err("노드 세션 집계 실패"))
    }

    async fn count_active_in_cluster(&self, cluster_id: ClusterId) -> Result<u32, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM sessions WHERE cluster_id = ?1 AND status IN ({})",
                status_list(SessionStatus::occupies_capacity)
            ),
            [cluster_id.0],
            |row| row.get(0),
        )
        .map_err(db_err("클러스터 세션 집계 실패"))
    }

    async fn max_vm_id_in_range(
        &self,
        cluster_id: ClusterId,
        min: u32,
        max: u32,
    ) -> Result<Option<u32>, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT MAX(vm_id) FROM sessions WHERE cluster_id = ?1 AND vm_id BETWEEN ?2 AND ?3",
            params![cluster_id.0, min, max],
            |row| row.get(0),
        )
        .map_err(db_err("VMID 조회 실패"))
    }

    async fn list_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<Session>, CoreError> {
        self.query_sessions(
            "status = 'active' AND expires_at <= ?1 ORDER BY expires_at",
            params![ts(now)],
        )
    }
}
