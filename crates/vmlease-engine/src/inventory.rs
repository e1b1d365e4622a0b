//! 노드 인벤토리 동기화.
//!
//! 하이퍼바이저가 보고하는 노드 목록을 저장소에 반영한다.
//! maintenance는 운영자가 지정한 상태이므로 덮어쓰지 않는다.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vmlease_core::error::CoreError;
use vmlease_core::models::cluster::{Cluster, Node, NodeStatus};
use vmlease_core::ports::hypervisor::HypervisorConnector;
use vmlease_core::ports::repository::{ClusterRepository, NodeRepository};

/// 노드 인벤토리 동기화기
pub struct NodeInventorySync {
    clusters: Arc<dyn ClusterRepository>,
    nodes: Arc<dyn NodeRepository>,
    connector: Arc<dyn HypervisorConnector>,
}

impl NodeInventorySync {
    pub fn new(
        clusters: Arc<dyn ClusterRepository>,
        nodes: Arc<dyn NodeRepository>,
        connector: Arc<dyn HypervisorConnector>,
    ) -> Self {
        Self {
            clusters,
            nodes,
            connector,
        }
    }

    /// 모든 활성 클러스터 동기화 → 갱신한 노드 수
    ///
    /// 한 클러스터의 실패는 경고만 남기고 다음 클러스터로 넘어간다.
    pub async fn sync_all(&self) -> Result<usize, CoreError> {
        let mut updated = 0;
        for cluster in self.clusters.list_active_clusters().await? {
            match self.sync_cluster(&cluster).await {
                Ok(count) => updated += count,
                Err(e) => warn!("노드 동기화 실패: cluster={}: {e}", cluster.name),
            }
        }
        Ok(updated)
    }

    /// 클러스터 하나 동기화
    pub async fn sync_cluster(&self, cluster: &Cluster) -> Result<usize, CoreError> {
        let api = self.connector.connect(cluster)?;
        let reported = api.list_nodes().await?;
        let known = self.nodes.list_nodes(cluster.id).await?;

        let mut seen = HashSet::new();
        let mut updated = 0;

        for summary in &reported {
            seen.insert(summary.node.as_str());
            let existing = known.iter().find(|n| n.name == summary.node);

            let status = match existing {
                Some(node) if node.status == NodeStatus::Maintenance => NodeStatus::Maintenance,
                _ if summary.is_online() => NodeStatus::Online,
                _ => NodeStatus::Offline,
            };
            let max_vms = existing
                .map(|n| n.max_vms)
                .unwrap_or(cluster.max_vms_per_node);

            if existing.is_some_and(|n| n.status == status && n.max_vms == max_vms) {
                continue;
            }

            self.nodes
                .upsert_node(&Node {
                    cluster_id: cluster.id,
                    name: summary.node.clone(),
                    status,
                    max_vms,
                })
                .await?;
            debug!(
                "노드 갱신: {}/{} → {}",
                cluster.name,
                summary.node,
                status.as_str()
            );
            updated += 1;
        }

        // 하이퍼바이저 목록에서 사라진 노드
        for node in known.iter().filter(|n| !seen.contains(n.name.as_str())) {
            if node.status != NodeStatus::Online {
                continue;
            }
            self.nodes
                .upsert_node(&Node {
                    status: NodeStatus::Offline,
                    ..node.clone()
                })
                .await?;
            info!("노드 사라짐 → offline: {}/{}", cluster.name, node.name);
            updated += 1;
        }

        Ok(updated)
    }
}
