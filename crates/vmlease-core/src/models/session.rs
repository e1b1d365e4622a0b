//! 세션 모델.
//!
//! 한 사용자가 한 VM을 일정 시간 임대하는 단위. 레코드는 삭제되지 않고
//! 종료 상태(expired/failed/terminated)로만 전이한다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::cluster::ClusterId;
use crate::models::template::TemplateId;

/// 세션 ID (UUIDv7, 생성 순 정렬 가능)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// 새 세션 ID 생성
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CoreError::validation("session_id", e.to_string()))
    }
}

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// 생성됨, 프로비저닝 대기
    Pending,
    /// 프로비저닝 진행 중
    Provisioning,
    /// 사용 가능 (VM + 원격 데스크톱 연결 준비 완료)
    Active,
    /// 종료 파이프라인 진행 중
    Expiring,
    /// 만료로 정리 완료
    Expired,
    /// 프로비저닝 실패
    Failed,
    /// 사용자 요청으로 종료
    Terminated,
}

impl SessionStatus {
    /// 모든 상태 (저장소 쿼리용)
    pub const ALL: [SessionStatus; 7] = [
        SessionStatus::Pending,
        SessionStatus::Provisioning,
        SessionStatus::Active,
        SessionStatus::Expiring,
        SessionStatus::Expired,
        SessionStatus::Failed,
        SessionStatus::Terminated,
    ];

    /// 종료 상태 여부
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Expired | SessionStatus::Failed | SessionStatus::Terminated
        )
    }

    /// 쿼터 계산에 포함되는 상태
    pub fn counts_toward_quota(self) -> bool {
        matches!(
            self,
            SessionStatus::Pending | SessionStatus::Provisioning | SessionStatus::Active
        )
    }

    /// 노드/클러스터 용량을 점유하는 상태
    pub fn occupies_capacity(self) -> bool {
        !self.is_terminal()
    }

    /// 허용된 전이인지. 같은 상태로의 전이는 갱신으로 본다
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        if self == next {
            return !self.is_terminal();
        }
        match self {
            Pending => matches!(next, Provisioning | Failed | Expiring),
            Provisioning => matches!(next, Active | Failed | Expiring),
            Active => matches!(next, Expiring | Expired | Terminated),
            Expiring => matches!(next, Expired | Terminated),
            Expired | Failed | Terminated => false,
        }
    }

    /// 저장소 문자열 표현
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Provisioning => "provisioning",
            SessionStatus::Active => "active",
            SessionStatus::Expiring => "expiring",
            SessionStatus::Expired => "expired",
            SessionStatus::Failed => "failed",
            SessionStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::validation("status", format!("알 수 없는 세션 상태: {s}")))
    }
}

/// 세션 유형. 종료 시 동작만 다르다
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// 종료 시 VM 삭제
    Ephemeral,
    /// 종료 시 VM 정지 후 보존
    Persistent,
}

impl SessionType {
    /// 저장소 문자열 표현
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Ephemeral => "ephemeral",
            SessionType::Persistent => "persistent",
        }
    }
}

impl FromStr for SessionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ephemeral" => Ok(SessionType::Ephemeral),
            "persistent" => Ok(SessionType::Persistent),
            other => Err(CoreError::validation(
                "session_type",
                format!("알 수 없는 세션 유형: {other}"),
            )),
        }
    }
}

/// VM 세션 레코드
///
/// `vm_id`, `gateway_connection_id`는 해당 파이프라인 단계 성공 후에만 설정된다.
/// `Active` 상태의 세션은 항상 두 값을 모두 가진다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// 세션 ID
    pub id: SessionId,
    /// 소유 사용자 ID
    pub user_id: String,
    /// 템플릿 ID
    pub template_id: TemplateId,
    /// 배치된 클러스터
    pub cluster_id: ClusterId,
    /// 배치된 노드 이름
    pub node: String,
    /// 하이퍼바이저 VMID
    pub vm_id: Option<u32>,
    /// 게스트 IPv4 주소
    pub guest_ip: Option<String>,
    /// 원격 데스크톱 게이트웨이 연결 ID
    pub gateway_connection_id: Option<String>,
    /// 세션 상태
    pub status: SessionStatus,
    /// 세션 유형
    pub session_type: SessionType,
    /// 만료 시각 (절대 시각)
    pub expires_at: DateTime<Utc>,
    /// 운영자 후속 조치 메모 (실패 사유 등)
    pub status_note: Option<String>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 마지막 갱신 시각
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// 새 `pending` 세션 생성
    pub fn new_pending(
        user_id: impl Into<String>,
        template_id: TemplateId,
        cluster_id: ClusterId,
        node: impl Into<String>,
        session_type: SessionType,
        now: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Self {
        Self {
            id: SessionId::new(),
            user_id: user_id.into(),
            template_id,
            cluster_id,
            node: node.into(),
            vm_id: None,
            guest_ip: None,
            gateway_connection_id: None,
            status: SessionStatus::Pending,
            session_type,
            expires_at: now + chrono::Duration::minutes(duration_minutes),
            status_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 남은 시간 (분, 음수는 0)
    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_minutes().max(0)
    }

    /// 만료 시각이 지났는지
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// 상태 전이 (갱신 시각 기록)
    pub fn transition(&mut self, status: SessionStatus, now: DateTime<Utc>) {
        if !self.status.can_transition_to(status) {
            tracing::warn!(
                "허용되지 않은 세션 상태 전이: session={} {} → {status}",
                self.id,
                self.status
            );
        }
        self.status = status;
        self.updated_at = now;
    }
}
