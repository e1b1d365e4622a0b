//! 엔진 공유 포트 묶음.
//!
//! 파이프라인 처리기와 세션 서비스가 같은 어댑터 집합을 공유한다.

use std::sync::Arc;
use tracing::warn;
use vmlease_core::error::CoreError;
use vmlease_core::models::session::{Session, SessionId};
use vmlease_core::ports::clock::Clock;
use vmlease_core::ports::gateway::GatewayApi;
use vmlease_core::ports::hypervisor::{HypervisorApi, HypervisorConnector};
use vmlease_core::ports::notifier::{AlertKind, OperatorAlert, OperatorNotifier};
use vmlease_core::ports::repository::{
    ClusterRepository, NodeRepository, SessionRepository, TemplateRepository,
};
use vmlease_core::ports::work_queue::WorkQueue;

/// 엔진이 사용하는 어댑터
#[derive(Clone)]
pub struct EngineContext {
    pub sessions: Arc<dyn SessionRepository>,
    pub clusters: Arc<dyn ClusterRepository>,
    pub nodes: Arc<dyn NodeRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub queue: Arc<dyn WorkQueue>,
    pub connector: Arc<dyn HypervisorConnector>,
    pub gateway: Arc<dyn GatewayApi>,
    pub notifier: Arc<dyn OperatorNotifier>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    /// 세션 조회 (없으면 NotFound)
    pub async fn load_session(&self, id: SessionId) -> Result<Session, CoreError> {
        self.sessions
            .find(id)
            .await?
            .ok_or_else(|| CoreError::not_found("Session", id))
    }

    /// 세션이 배치된 클러스터의 하이퍼바이저 클라이언트
    pub async fn hypervisor_for(
        &self,
        session: &Session,
    ) -> Result<Arc<dyn HypervisorApi>, CoreError> {
        let cluster = self
            .clusters
            .find_cluster(session.cluster_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Cluster", session.cluster_id))?;
        self.connector.connect(&cluster)
    }

    /// 운영자 알림 (실패는 로그만 남김)
    pub async fn alert(&self, kind: AlertKind, session_id: SessionId, message: String) {
        let alert = OperatorAlert {
            kind,
            session_id,
            message,
            occurred_at: self.clock.now(),
        };
        if let Err(e) = self.notifier.notify(&alert).await {
            warn!("운영자 알림 전송 실패: session={session_id}: {e}");
        }
    }
}
