//! 저장소 포트.
//!
//! 구현: `vmlease-storage` crate (rusqlite)
//!
//! 엔티티마다 명시적 저장소 인터페이스를 두고, 관계는 ID로 해석한다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::models::cluster::{Cluster, ClusterId, Node};
use crate::models::session::{Session, SessionId};
use crate::models::template::{Template, TemplateId};

/// 세션 저장소
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// 새 세션 저장
    async fn insert(&self, session: &Session) -> Result<(), CoreError>;

    /// 세션 갱신 (전체 필드 덮어쓰기)
    ///
    /// 저장된 상태에서 `session.status`로의 전이가 허용되지 않으면
    /// `CoreError::InvalidState`로 거부한다.
    async fn save(&self, session: &Session) -> Result<(), CoreError>;

    /// 조회 이후 다른 쓰기가 없었을 때만 갱신 (`updated_at` 비교)
    ///
    /// 충돌하면 `CoreError::InvalidState`.
    async fn save_if_unchanged(
        &self,
        session: &Session,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    /// ID로 조회
    async fn find(&self, id: SessionId) -> Result<Option<Session>, CoreError>;

    /// 사용자의 모든 세션 (최신순)
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>, CoreError>;

    /// 사용자의 쿼터 대상 세션 (pending/provisioning/active)
    async fn list_active_by_user(&self, user_id: &str) -> Result<Vec<Session>, CoreError>;

    /// 노드의 용량 점유 세션 수
    async fn count_active_on_node(&self, cluster_id: ClusterId, node: &str)
        -> Result<u32, CoreError>;

    /// 클러스터의 용량 점유 세션 수
    async fn count_active_in_cluster(&self, cluster_id: ClusterId) -> Result<u32, CoreError>;

    /// 클러스터에서 범위 안에 할당된 최대 VMID
    async fn max_vm_id_in_range(
        &self,
        cluster_id: ClusterId,
        min: u32,
        max: u32,
    ) -> Result<Option<u32>, CoreError>;

    /// 만료 시각이 지난 active 세션
    async fn list_expired_active(&self, now: DateTime<Utc>) -> Result<Vec<Session>, CoreError>;
}

/// 클러스터 저장소
#[async_trait]
pub trait ClusterRepository: Send + Sync {
    /// 클러스터 등록
    async fn insert_cluster(&self, cluster: &Cluster) -> Result<ClusterId, CoreError>;

    /// ID로 조회
    async fn find_cluster(&self, id: ClusterId) -> Result<Option<Cluster>, CoreError>;

    /// 활성 클러스터 목록 (ID 오름차순)
    async fn list_active_clusters(&self) -> Result<Vec<Cluster>, CoreError>;
}

/// 노드 저장소
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// 노드 등록/갱신
    async fn upsert_node(&self, node: &Node) -> Result<(), CoreError>;

    /// 클러스터 노드 전체 (이름순)
    async fn list_nodes(&self, cluster_id: ClusterId) -> Result<Vec<Node>, CoreError>;

    /// 클러스터의 온라인 노드 (이름순)
    async fn list_online_nodes(&self, cluster_id: ClusterId) -> Result<Vec<Node>, CoreError>;
}

/// 템플릿 저장소
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// 템플릿 등록
    async fn insert_template(&self, template: &Template) -> Result<TemplateId, CoreError>;

    /// ID로 조회
    async fn find_template(&self, id: TemplateId) -> Result<Option<Template>, CoreError>;

    /// 활성 템플릿 목록
    async fn list_active_templates(&self) -> Result<Vec<Template>, CoreError>;
}
