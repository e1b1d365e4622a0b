//! 하이퍼바이저 API 포트.
//!
//! 구현: `vmlease-network` crate (reqwest, Proxmox VE REST API)

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::CoreError;
use crate::models::cluster::Cluster;
use crate::models::telemetry::{NodeSummary, NodeTelemetry, VmStatus};

/// 하이퍼바이저 노드/VM 라이프사이클 API
///
/// 모든 호출은 인증 토큰을 포함하며 구현체 내부에서 재시도 정책이 적용된다.
#[async_trait]
pub trait HypervisorApi: Send + Sync {
    /// 클러스터 노드 목록
    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, CoreError>;

    /// 노드 실시간 상태 (CPU/RAM)
    async fn get_node_status(&self, node: &str) -> Result<NodeTelemetry, CoreError>;

    /// 템플릿을 대상 노드에 새 VMID로 클론
    async fn clone_template(
        &self,
        template_id: u32,
        node: &str,
        new_id: u32,
        name: &str,
    ) -> Result<(), CoreError>;

    /// VM 시작
    async fn start_vm(&self, node: &str, vm_id: u32) -> Result<(), CoreError>;

    /// VM 정지
    async fn stop_vm(&self, node: &str, vm_id: u32) -> Result<(), CoreError>;

    /// VM 삭제 (이미 없으면 성공으로 간주)
    async fn delete_vm(&self, node: &str, vm_id: u32) -> Result<(), CoreError>;

    /// VM 상태
    async fn get_vm_status(&self, node: &str, vm_id: u32) -> Result<VmStatus, CoreError>;

    /// 게스트 에이전트가 보고한 IPv4 주소 (링크 로컬/루프백 제외)
    async fn get_vm_network_ip(&self, node: &str, vm_id: u32)
        -> Result<Option<String>, CoreError>;

    /// 스냅샷으로 되돌리기
    async fn rollback_snapshot(
        &self,
        node: &str,
        vm_id: u32,
        snapshot: &str,
    ) -> Result<(), CoreError>;
}

/// 클러스터별 하이퍼바이저 클라이언트 제공자
///
/// 클러스터마다 접속 주소와 자격증명이 다르므로 클러스터 레코드로부터 클라이언트를 만든다.
pub trait HypervisorConnector: Send + Sync {
    /// 클러스터용 클라이언트 반환
    fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn HypervisorApi>, CoreError>;
}
