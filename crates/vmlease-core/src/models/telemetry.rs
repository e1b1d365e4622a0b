//! 하이퍼바이저 텔레메트리 모델.
//!
//! 노드 요약, 노드 실시간 상태, VM 상태.

use serde::{Deserialize, Serialize};

/// 노드 목록 항목 (`listNodes`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    /// 노드 이름
    pub node: String,
    /// 온라인 여부 ("online" / "offline" / "unknown")
    pub status: String,
}

impl NodeSummary {
    /// 온라인 여부
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

/// 노드 실시간 상태 (`getNodeStatus`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeTelemetry {
    /// CPU 사용률 (0..1, 전체 코어 기준)
    pub cpu: f64,
    /// 사용 메모리 (bytes)
    pub mem: u64,
    /// 전체 메모리 (bytes)
    pub maxmem: u64,
    /// 코어 수
    pub maxcpu: u32,
    /// 가동 시간 (초)
    pub uptime: u64,
}

impl NodeTelemetry {
    /// 메모리 사용률 (0..1)
    pub fn ram_fraction(&self) -> f64 {
        if self.maxmem == 0 {
            return 1.0;
        }
        self.mem as f64 / self.maxmem as f64
    }
}

/// VM 전원 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmPowerState {
    Running,
    Stopped,
    Paused,
    #[serde(other)]
    Unknown,
}

/// VM 상태 (`getVMStatus`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmStatus {
    /// 전원 상태
    pub status: VmPowerState,
    /// VM 이름
    #[serde(default)]
    pub name: Option<String>,
    /// 가동 시간 (초)
    #[serde(default)]
    pub uptime: Option<u64>,
}

impl VmStatus {
    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.status == VmPowerState::Running
    }
}
