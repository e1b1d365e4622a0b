//! 운영자 알림 포트.
//!
//! 구현: `vmlease-network` crate (웹훅), `vmlease-app` (tracing 로그)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;
use crate::models::session::SessionId;

/// 운영자 알림 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// 프로비저닝 최종 실패
    ProvisioningFailed,
    /// 종료 파이프라인 일부 실패 (세션은 expired 처리됨)
    TerminationIncomplete,
}

/// 운영자 알림
#[derive(Debug, Clone, Serialize)]
pub struct OperatorAlert {
    /// 알림 종류
    pub kind: AlertKind,
    /// 대상 세션
    pub session_id: SessionId,
    /// 상세 메시지
    pub message: String,
    /// 발생 시각
    pub occurred_at: DateTime<Utc>,
}

/// 운영자 알림 인터페이스
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    /// 알림 전송
    async fn notify(&self, alert: &OperatorAlert) -> Result<(), CoreError>;
}
