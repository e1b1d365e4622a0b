//! 파이프라인 작업(task) 모델.
//!
//! 작업은 (세션 ID, 단계, 시도 횟수)의 순수 함수로 실행된다.
//! 스케줄링, 백오프, 배타 키는 큐 런타임이 소유한다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::session::SessionId;

/// 프로비저닝 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    /// pending → provisioning
    Begin,
    /// VMID 할당 + 템플릿 클론
    Clone,
    /// VM 시작
    Boot,
    /// running 상태 대기
    WaitRunning,
    /// 게스트 IP 확인
    ResolveIp,
    /// 게이트웨이 연결 생성 + active 전이
    Connect,
}

impl ProvisionStep {
    /// 다음 단계
    pub fn next(self) -> Option<ProvisionStep> {
        match self {
            ProvisionStep::Begin => Some(ProvisionStep::Clone),
            ProvisionStep::Clone => Some(ProvisionStep::Boot),
            ProvisionStep::Boot => Some(ProvisionStep::WaitRunning),
            ProvisionStep::WaitRunning => Some(ProvisionStep::ResolveIp),
            ProvisionStep::ResolveIp => Some(ProvisionStep::Connect),
            ProvisionStep::Connect => None,
        }
    }
}

/// 종료 단계 (순서 고정, 병렬화 금지)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateStep {
    /// 상태를 expiring으로 표시
    Begin,
    /// 게이트웨이 연결 삭제
    DeleteConnection,
    /// 스냅샷 되돌리기 (persistent 전용, 실패 무시)
    RevertSnapshot,
    /// VM 삭제(ephemeral) 또는 정지(persistent)
    ReleaseVm,
    /// 최종 상태 기록
    Finalize,
}

impl TerminateStep {
    /// 다음 단계
    pub fn next(self) -> Option<TerminateStep> {
        match self {
            TerminateStep::Begin => Some(TerminateStep::DeleteConnection),
            TerminateStep::DeleteConnection => Some(TerminateStep::RevertSnapshot),
            TerminateStep::RevertSnapshot => Some(TerminateStep::ReleaseVm),
            TerminateStep::ReleaseVm => Some(TerminateStep::Finalize),
            TerminateStep::Finalize => None,
        }
    }
}

/// 종료 사유. 최종 상태를 결정한다
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// 만료 → expired
    Expired,
    /// 소유자 요청 → terminated
    UserRequested,
}

/// 종료 요청 파라미터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationRequest {
    /// 종료 사유
    pub reason: TerminationReason,
    /// VM 정리 여부
    pub stop_vm: bool,
    /// 되돌릴 스냅샷 이름 (persistent 전용)
    #[serde(default)]
    pub snapshot_name: Option<String>,
    /// 앞 단계에서 남긴 운영자 메모
    #[serde(default)]
    pub note: Option<String>,
}

impl TerminationRequest {
    /// 만료에 의한 종료
    pub fn expiry() -> Self {
        Self {
            reason: TerminationReason::Expired,
            stop_vm: true,
            snapshot_name: None,
            note: None,
        }
    }
}

/// 작업 종류
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// 프로비저닝 단계
    Provision { step: ProvisionStep },
    /// 종료 단계
    Terminate {
        step: TerminateStep,
        request: TerminationRequest,
    },
    /// 예약된 만료 확인
    Expire,
}

impl TaskKind {
    /// 로그용 이름
    pub fn label(&self) -> String {
        match self {
            TaskKind::Provision { step } => format!("provision/{step:?}"),
            TaskKind::Terminate { step, .. } => format!("terminate/{step:?}"),
            TaskKind::Expire => "expire".to_string(),
        }
    }
}

/// 큐에 넣을 새 작업
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    /// 대상 세션
    pub session_id: SessionId,
    /// 작업 종류
    pub kind: TaskKind,
    /// 실행 가능 시각
    pub run_at: DateTime<Utc>,
    /// 배타 실행 키 (같은 키의 작업은 동시에 실행되지 않음)
    pub exclusivity_key: Option<String>,
}

impl NewTask {
    /// 세션 배타 키를 가진 작업
    pub fn for_session(session_id: SessionId, kind: TaskKind, run_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            kind,
            run_at,
            exclusivity_key: Some(session_id.to_string()),
        }
    }
}

/// 임대(lease)된 작업
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// 작업 ID
    pub id: i64,
    /// 대상 세션
    pub session_id: SessionId,
    /// 작업 종류
    pub kind: TaskKind,
    /// 현재 시도 번호 (1부터)
    pub attempt: u32,
    /// 실행 예정 시각
    pub run_at: DateTime<Utc>,
    /// 배타 실행 키
    pub exclusivity_key: Option<String>,
}

/// 작업 실행 결과
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// 성공. 다음 단계가 있으면 즉시 이어서 큐에 넣는다
    Completed { next: Option<TaskKind> },
    /// 재시도 가능 실패
    Retryable(String),
    /// 재시도 불가 실패
    Terminal(String),
}

impl TaskOutcome {
    /// 후속 단계 없는 성공
    pub fn done() -> Self {
        TaskOutcome::Completed { next: None }
    }

    /// 후속 단계가 있는 성공
    pub fn then(next: TaskKind) -> Self {
        TaskOutcome::Completed { next: Some(next) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_steps_chain_in_order() {
        let mut step = ProvisionStep::Begin;
        let mut seen = vec![step];
        while let Some(next) = step.next() {
            seen.push(next);
            step = next;
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last(), Some(&ProvisionStep::Connect));
    }

    #[test]
    fn terminate_steps_delete_connection_before_vm() {
        assert_eq!(
            TerminateStep::Begin.next(),
            Some(TerminateStep::DeleteConnection)
        );
        assert_eq!(
            TerminateStep::RevertSnapshot.next(),
            Some(TerminateStep::ReleaseVm)
        );
        assert_eq!(TerminateStep::Finalize.next(), None);
    }

    #[test]
    fn task_kind_json_is_tagged() {
        let kind = TaskKind::Terminate {
            step: TerminateStep::ReleaseVm,
            request: TerminationRequest::expiry(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains(r#""kind":"terminate""#));
        let back: TaskKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }
}
