//! 클러스터 내 노드 선택.
//!
//! 온라인 노드 중 VM 상한에 여유가 있는 노드의 부하 점수를 비교해
//! 가장 낮은 노드를 고른다. 최저 점수도 과부하 임계값을 넘으면 배치를 거부한다.

use std::sync::Arc;
use tracing::{debug, info, warn};
use vmlease_core::error::{CoreError, PlacementError};
use vmlease_core::models::cluster::{Cluster, ClusterId, NodeKey};
use vmlease_core::ports::hypervisor::HypervisorConnector;
use vmlease_core::ports::repository::{NodeRepository, SessionRepository};

use crate::scorer::LoadScorer;

/// 배치 결과
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    /// 클러스터
    pub cluster_id: ClusterId,
    /// 선택된 노드
    pub node: String,
    /// 선택 시점 부하 점수
    pub score: f64,
}

/// 노드 선택기
pub struct NodeSelector {
    sessions: Arc<dyn SessionRepository>,
    nodes: Arc<dyn NodeRepository>,
    connector: Arc<dyn HypervisorConnector>,
    scorer: Arc<LoadScorer>,
    overload_threshold: f64,
}

impl NodeSelector {
    /// 새 선택기 생성
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        nodes: Arc<dyn NodeRepository>,
        connector: Arc<dyn HypervisorConnector>,
        scorer: Arc<LoadScorer>,
        overload_threshold: f64,
    ) -> Self {
        Self {
            sessions,
            nodes,
            connector,
            scorer,
            overload_threshold,
        }
    }

    /// 클러스터에서 배치할 노드 선택
    pub async fn select(&self, cluster: &Cluster) -> Result<Placement, CoreError> {
        if !cluster.is_active {
            return Err(PlacementError::ClusterInactive {
                cluster: cluster.name.clone(),
            }
            .into());
        }

        let active = self.sessions.count_active_in_cluster(cluster.id).await?;
        if active >= cluster.max_concurrent_sessions {
            return Err(PlacementError::ClusterAtCapacity {
                cluster: cluster.name.clone(),
                active,
                max: cluster.max_concurrent_sessions,
            }
            .into());
        }

        let online = self.nodes.list_online_nodes(cluster.id).await?;
        if online.is_empty() {
            return Err(PlacementError::NoOnlineNodes {
                cluster: cluster.name.clone(),
            }
            .into());
        }

        let api = self.connector.connect(cluster)?;

        let mut best: Option<(String, f64)> = None;
        let mut telemetry_failures = 0usize;
        let mut node_capacity = 0u32;

        // 이름순으로 순회하고 동점이면 먼저 본 노드를 유지한다
        for node in &online {
            let cap = node.effective_max_vms(cluster);
            node_capacity += cap;

            let running = self
                .sessions
                .count_active_on_node(cluster.id, &node.name)
                .await?;
            if running >= cap {
                debug!("노드 VM 상한 도달, 제외: {}/{} ({running}/{cap})", cluster.name, node.name);
                continue;
            }

            match self.scorer.score(api.as_ref(), cluster, &node.name).await {
                Ok(score) => {
                    if best.as_ref().map_or(true, |(_, current)| score < *current) {
                        best = Some((node.name.clone(), score));
                    }
                }
                Err(e) => {
                    warn!("노드 텔레메트리 조회 실패, 제외: {}/{}: {e}", cluster.name, node.name);
                    telemetry_failures += 1;
                }
            }
        }

        let Some((node, score)) = best else {
            if telemetry_failures > 0 {
                return Err(PlacementError::TelemetryUnavailable {
                    cluster: cluster.name.clone(),
                }
                .into());
            }
            return Err(PlacementError::ClusterAtCapacity {
                cluster: cluster.name.clone(),
                active,
                max: node_capacity,
            }
            .into());
        };

        if score > self.overload_threshold {
            return Err(PlacementError::CapacityExhausted {
                cluster: cluster.name.clone(),
                node,
                score,
                threshold: self.overload_threshold,
            }
            .into());
        }

        // 새 VM이 올라가므로 다음 배치는 이 노드의 최신 텔레메트리를 본다
        self.scorer.invalidate(&NodeKey::new(cluster.id, node.as_str()));

        info!("노드 선택: {}/{node} (점수 {score:.3})", cluster.name);
        Ok(Placement {
            cluster_id: cluster.id,
            node,
            score,
        })
    }
}
