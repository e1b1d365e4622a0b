//! 클러스터 선택.
//!
//! 요청에 클러스터가 지정되면 해당 클러스터에만 배치를 시도한다.
//! 지정이 없으면 활성 클러스터를 온라인 노드 수 내림차순으로 정렬해
//! 배치에 성공할 때까지 차례로 시도한다.

use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vmlease_core::error::{CoreError, PlacementError};
use vmlease_core::models::cluster::{Cluster, ClusterId};
use vmlease_core::ports::repository::{ClusterRepository, NodeRepository};

use crate::node_selector::{NodeSelector, Placement};

/// 클러스터 선택기
pub struct ClusterSelector {
    clusters: Arc<dyn ClusterRepository>,
    nodes: Arc<dyn NodeRepository>,
    node_selector: Arc<NodeSelector>,
}

impl ClusterSelector {
    /// 새 선택기 생성
    pub fn new(
        clusters: Arc<dyn ClusterRepository>,
        nodes: Arc<dyn NodeRepository>,
        node_selector: Arc<NodeSelector>,
    ) -> Self {
        Self {
            clusters,
            nodes,
            node_selector,
        }
    }

    /// 배치 대상 클러스터 + 노드 선택
    pub async fn select(&self, requested: Option<ClusterId>) -> Result<Placement, CoreError> {
        if let Some(id) = requested {
            let cluster = self
                .clusters
                .find_cluster(id)
                .await?
                .ok_or_else(|| CoreError::not_found("Cluster", id))?;
            return self.node_selector.select(&cluster).await;
        }

        let ranked = self.ranked_clusters().await?;
        if ranked.is_empty() {
            return Err(PlacementError::NoActiveClusters.into());
        }

        let tried = ranked.len();
        for cluster in &ranked {
            match self.node_selector.select(cluster).await {
                Ok(placement) => return Ok(placement),
                Err(e) => {
                    warn!("클러스터 배치 실패, 다음 후보 시도: {}: {e}", cluster.name);
                }
            }
        }

        info!("모든 클러스터 배치 실패 ({tried}개)");
        Err(PlacementError::AllClustersOverloaded { tried }.into())
    }

    /// 활성 클러스터를 온라인 노드 수 내림차순으로 정렬 (동수는 ID 순서 유지)
    async fn ranked_clusters(&self) -> Result<Vec<Cluster>, CoreError> {
        let clusters = self.clusters.list_active_clusters().await?;

        let mut ranked = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let online = self.nodes.list_online_nodes(cluster.id).await?.len();
            debug!("클러스터 후보: {} (온라인 노드 {online})", cluster.name);
            ranked.push((online, cluster));
        }

        ranked.sort_by_key(|(online, _)| Reverse(*online));
        Ok(ranked.into_iter().map(|(_, cluster)| cluster).collect())
    }
}
