//! Proxmox VE REST API 클라이언트.
//!
//! `HypervisorApi` 포트 구현. API 토큰 인증 헤더 주입 + 재시도 로직.
//! 모든 응답은 `{"data": ...}` 봉투로 감싸져 있다.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;
use vmlease_core::error::CoreError;
use vmlease_core::models::cluster::ClusterCredentials;
use vmlease_core::models::telemetry::{NodeSummary, NodeTelemetry, VmStatus};
use vmlease_core::ports::hypervisor::HypervisorApi;

use crate::retry::{check_response, map_send_error, RetryPolicy};

/// API 경로 접두사
const API_PREFIX: &str = "/api2/json";

/// 응답 봉투
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// `/nodes/{node}/status` 응답
#[derive(Debug, Deserialize)]
struct RawNodeStatus {
    #[serde(default)]
    cpu: f64,
    memory: RawMemory,
    cpuinfo: RawCpuInfo,
    #[serde(default)]
    uptime: u64,
}

#[derive(Debug, Deserialize)]
struct RawMemory {
    used: u64,
    total: u64,
}

#[derive(Debug, Deserialize)]
struct RawCpuInfo {
    cpus: u32,
}

/// 게스트 에이전트 `network-get-interfaces` 응답
#[derive(Debug, Deserialize)]
struct AgentInterfaces {
    #[serde(default)]
    result: Vec<AgentInterface>,
}

#[derive(Debug, Deserialize)]
struct AgentInterface {
    #[serde(default, rename = "ip-addresses")]
    ip_addresses: Vec<AgentIpAddress>,
}

#[derive(Debug, Deserialize)]
struct AgentIpAddress {
    #[serde(rename = "ip-address-type")]
    address_type: String,
    #[serde(rename = "ip-address")]
    address: String,
}

/// 게스트에서 접속 가능한 IPv4 주소 선택 (루프백, 링크 로컬 제외)
fn pick_guest_ipv4(interfaces: &AgentInterfaces) -> Option<String> {
    interfaces
        .result
        .iter()
        .flat_map(|iface| iface.ip_addresses.iter())
        .filter(|addr| addr.address_type == "ipv4")
        .filter_map(|addr| addr.address.parse::<Ipv4Addr>().ok())
        .find(|ip| !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified())
        .map(|ip| ip.to_string())
}

/// 없는 VMID에 대한 응답 (500 "Configuration file ... does not exist")을 `NotFound`로 바꾼다
fn missing_vm_as_not_found(error: CoreError, vm_id: u32) -> CoreError {
    match error {
        CoreError::Api { message, .. } if message.contains("does not exist") => {
            CoreError::not_found("VM", vm_id)
        }
        other => other,
    }
}

/// Proxmox VE 클라이언트 (`HypervisorApi` 포트 구현)
pub struct ProxmoxClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: String,
    retry: RetryPolicy,
}

impl ProxmoxClient {
    /// 새 클라이언트 생성
    ///
    /// `base_url`은 `https://host:port` 형식 (API 경로 제외).
    pub fn new(
        base_url: &str,
        credentials: &ClusterCredentials,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!credentials.verify_tls)
            .build()
            .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!(
                "PVEAPIToken={}={}",
                credentials.token_id, credentials.token_secret
            ),
            retry: RetryPolicy::default(),
        })
    }

    /// 재시도 정책 설정
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        self.client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
    }

    /// GET 후 `data` 필드 역직렬화
    async fn get_data<T: DeserializeOwned>(&self, what: &str, path: &str) -> Result<T, CoreError> {
        self.retry
            .execute(what, || async {
                let resp = self
                    .request(reqwest::Method::GET, path)
                    .send()
                    .await
                    .map_err(|e| map_send_error(what, e))?;
                let resp = check_response(resp, what).await?;
                let envelope: Envelope<T> = resp
                    .json()
                    .await
                    .map_err(|e| CoreError::Internal(format!("{what} 응답 파싱 실패: {e}")))?;
                Ok(envelope.data)
            })
            .await
    }

    /// 폼 POST (응답 본문은 작업 UPID라 무시)
    async fn post_form(
        &self,
        what: &str,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<(), CoreError> {
        self.retry
            .execute(what, || async {
                let resp = self
                    .request(reqwest::Method::POST, path)
                    .form(form)
                    .send()
                    .await
                    .map_err(|e| map_send_error(what, e))?;
                check_response(resp, what).await?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl HypervisorApi for ProxmoxClient {
    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, CoreError> {
        self.get_data("노드 목록 조회", "/nodes").await
    }

    async fn get_node_status(&self, node: &str) -> Result<NodeTelemetry, CoreError> {
        let raw: RawNodeStatus = self
            .get_data("노드 상태 조회", &format!("/nodes/{node}/status"))
            .await?;
        Ok(NodeTelemetry {
            cpu: raw.cpu,
            mem: raw.memory.used,
            maxmem: raw.memory.total,
            maxcpu: raw.cpuinfo.cpus,
            uptime: raw.uptime,
        })
    }

    async fn clone_template(
        &self,
        template_id: u32,
        node: &str,
        new_id: u32,
        name: &str,
    ) -> Result<(), CoreError> {
        debug!("템플릿 클론 요청: template={template_id}, node={node}, vmid={new_id}");
        let form = [
            ("newid", new_id.to_string()),
            ("name", name.to_string()),
            ("target", node.to_string()),
            ("full", "1".to_string()),
        ];
        self.post_form(
            "템플릿 클론",
            &format!("/nodes/{node}/qemu/{template_id}/clone"),
            &form,
        )
        .await
    }

    async fn start_vm(&self, node: &str, vm_id: u32) -> Result<(), CoreError> {
        debug!("VM 시작 요청: node={node}, vmid={vm_id}");
        self.post_form(
            "VM 시작",
            &format!("/nodes/{node}/qemu/{vm_id}/status/start"),
            &[],
        )
        .await
    }

    async fn stop_vm(&self, node: &str, vm_id: u32) -> Result<(), CoreError> {
        debug!("VM 정지 요청: node={node}, vmid={vm_id}");
        self.post_form(
            "VM 정지",
            &format!("/nodes/{node}/qemu/{vm_id}/status/stop"),
            &[],
        )
        .await
    }

    async fn delete_vm(&self, node: &str, vm_id: u32) -> Result<(), CoreError> {
        debug!("VM 삭제 요청: node={node}, vmid={vm_id}");
        let what = "VM 삭제";
        let path = format!("/nodes/{node}/qemu/{vm_id}?purge=1");
        let result = self
            .retry
            .execute(what, || async {
                let resp = self
                    .request(reqwest::Method::DELETE, &path)
                    .send()
                    .await
                    .map_err(|e| map_send_error(what, e))?;
                check_response(resp, what).await?;
                Ok(())
            })
            .await;

        match result.map_err(|e| missing_vm_as_not_found(e, vm_id)) {
            Err(CoreError::NotFound { .. }) => {
                debug!("VM이 이미 없음: vmid={vm_id}");
                Ok(())
            }
            other => other,
        }
    }

    async fn get_vm_status(&self, node: &str, vm_id: u32) -> Result<VmStatus, CoreError> {
        self.get_data(
            "VM 상태 조회",
            &format!("/nodes/{node}/qemu/{vm_id}/status/current"),
        )
        .await
        .map_err(|e| missing_vm_as_not_found(e, vm_id))
    }

    async fn get_vm_network_ip(&self, node: &str, vm_id: u32) -> Result<Option<String>, CoreError> {
        let interfaces: AgentInterfaces = self
            .get_data(
                "게스트 네트워크 조회",
                &format!("/nodes/{node}/qemu/{vm_id}/agent/network-get-interfaces"),
            )
            .await?;
        Ok(pick_guest_ipv4(&interfaces))
    }

    async fn rollback_snapshot(
        &self,
        node: &str,
        vm_id: u32,
        snapshot: &str,
    ) -> Result<(), CoreError> {
        debug!("스냅샷 복원 요청: vmid={vm_id}, snapshot={snapshot}");
        self.post_form(
            "스냅샷 복원",
            &format!("/nodes/{node}/qemu/{vm_id}/snapshot/{snapshot}/rollback"),
            &[],
        )
        .await
    }
}
