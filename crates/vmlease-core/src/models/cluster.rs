//! 클러스터/노드 모델.
//!
//! 클러스터 자격증명은 외부 관리 화면이 소유한다. 코어는 불투명 값으로만 다룬다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// 클러스터 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub i64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 하이퍼바이저 API 자격증명 (API 토큰)
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCredentials {
    /// 토큰 ID (예: "root@pam!vmlease")
    pub token_id: String,
    /// 토큰 시크릿
    pub token_secret: String,
    /// TLS 인증서 검증 여부
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
}

impl fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCredentials")
            .field("token_id", &self.token_id)
            .field("token_secret", &"***")
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

fn default_verify_tls() -> bool {
    true
}

/// 하이퍼바이저 클러스터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// 클러스터 ID
    pub id: ClusterId,
    /// 표시 이름
    pub name: String,
    /// API 호스트
    pub host: String,
    /// API 포트
    pub port: u16,
    /// 자격증명
    pub credentials: ClusterCredentials,
    /// 신규 배치 허용 여부
    pub is_active: bool,
    /// 노드당 최대 VM 수
    pub max_vms_per_node: u32,
    /// 클러스터 전체 동시 세션 상한
    pub max_concurrent_sessions: u32,
    /// CPU 오버커밋 비율
    pub cpu_overcommit_ratio: f64,
    /// 메모리 오버커밋 비율
    pub memory_overcommit_ratio: f64,
}

impl Cluster {
    /// API 기본 URL
    pub fn api_base_url(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }
}

/// 노드 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// 배치 가능
    Online,
    /// 연결 불가
    Offline,
    /// 운영자가 유지보수로 지정 (동기화가 덮어쓰지 않음)
    Maintenance,
}

impl NodeStatus {
    /// 저장소 문자열 표현
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Maintenance => "maintenance",
        }
    }
}

impl FromStr for NodeStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(NodeStatus::Online),
            "offline" => Ok(NodeStatus::Offline),
            "maintenance" => Ok(NodeStatus::Maintenance),
            other => Err(CoreError::validation(
                "node_status",
                format!("알 수 없는 노드 상태: {other}"),
            )),
        }
    }
}

/// 클러스터 소속 노드
///
/// 활성 VM 수와 가용 CPU/RAM은 저장하지 않고 필요 시 계산한다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// 소속 클러스터
    pub cluster_id: ClusterId,
    /// 노드 이름 (하이퍼바이저 기준)
    pub name: String,
    /// 노드 상태
    pub status: NodeStatus,
    /// 최대 VM 수
    pub max_vms: u32,
}

impl Node {
    /// 클러스터 상한을 함께 고려한 실효 VM 상한
    pub fn effective_max_vms(&self, cluster: &Cluster) -> u32 {
        self.max_vms.min(cluster.max_vms_per_node)
    }
}

/// 노드 식별 키 (캐시/로그용)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    /// 클러스터 ID
    pub cluster_id: ClusterId,
    /// 노드 이름
    pub node: String,
}

impl NodeKey {
    /// 새 노드 키
    pub fn new(cluster_id: ClusterId, node: impl Into<String>) -> Self {
        Self {
            cluster_id,
            node: node.into(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster_id, self.node)
    }
}
