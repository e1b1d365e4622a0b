//! 엔진 단위 테스트용 가짜 포트 구현.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use vmlease_core::error::CoreError;
use vmlease_core::models::cluster::{Cluster, ClusterCredentials, ClusterId, Node, NodeStatus};
use vmlease_core::models::telemetry::{NodeSummary, NodeTelemetry, VmPowerState, VmStatus};
use vmlease_core::models::template::{Protocol, Template, TemplateId};
use vmlease_core::ports::clock::Clock;
use vmlease_core::ports::gateway::{ConnectionDetails, ConnectionSpec, GatewayApi};
use vmlease_core::ports::hypervisor::{HypervisorApi, HypervisorConnector};
use vmlease_core::ports::notifier::{OperatorAlert, OperatorNotifier};
use vmlease_core::ports::repository::{ClusterRepository, NodeRepository, TemplateRepository};
use vmlease_storage::sqlite::SqliteStorage;

use crate::context::EngineContext;

/// 하이퍼바이저/게이트웨이 호출 순서 기록
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

// ============================================================
// 시계
// ============================================================

/// 수동 시계. `sleep`은 즉시 반환하고 시각만 전진시킨다
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        let by = chrono::Duration::from_std(duration).unwrap();
        self.advance(by);
    }
}

// ============================================================
// 하이퍼바이저
// ============================================================

#[derive(Default)]
pub struct HypervisorState {
    pub nodes: Vec<NodeSummary>,
    pub telemetry: HashMap<String, NodeTelemetry>,
    /// VMID → running 여부
    pub vms: HashMap<u32, bool>,
    /// VMID → VM 이름
    pub names: HashMap<u32, String>,
    /// running이 되기 전까지 stopped로 응답할 상태 조회 횟수
    pub polls_until_running: u32,
    /// IP가 잡히기 전까지 None으로 응답할 조회 횟수
    pub polls_until_ip: u32,
    pub ip: String,
    /// 네트워크 에러로 실패시킬 연산 이름
    pub failing: HashSet<&'static str>,
    status_polls: u32,
    ip_polls: u32,
}

pub struct FakeHypervisor {
    pub state: Mutex<HypervisorState>,
    log: CallLog,
    /// 호출마다 시계를 이만큼 전진 (느린 API 흉내)
    latency: Mutex<Option<(Arc<ManualClock>, chrono::Duration)>>,
    /// 다음 게스트 IP 조회를 멈춰 세울 신호 (진입, 재개)
    ip_gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeHypervisor {
    pub fn new(log: CallLog) -> Self {
        Self {
            state: Mutex::new(HypervisorState {
                ip: "10.0.0.15".to_string(),
                ..Default::default()
            }),
            log,
            latency: Mutex::new(None),
            ip_gate: Mutex::new(None),
        }
    }

    pub fn with_latency(self, clock: Arc<ManualClock>, per_call: chrono::Duration) -> Self {
        self.slow_down(clock, per_call);
        self
    }

    pub fn slow_down(&self, clock: Arc<ManualClock>, per_call: chrono::Duration) {
        *self.latency.lock() = Some((clock, per_call));
    }

    pub fn with_node(self, name: &str, cpu: f64, ram: f64) -> Self {
        {
            let mut state = self.state.lock();
            state.nodes.push(NodeSummary {
                node: name.to_string(),
                status: "online".to_string(),
            });
            state.telemetry.insert(name.to_string(), telemetry(cpu, ram));
        }
        self
    }

    pub fn fail(&self, op: &'static str) {
        self.state.lock().failing.insert(op);
    }

    /// 다음 `get_vm_network_ip` 호출을 재개 신호까지 멈춘다 → (진입 신호, 재개 신호)
    pub fn pause_ip_lookup(&self) -> (Arc<Notify>, Arc<Notify>) {
        let gate = (Arc::new(Notify::new()), Arc::new(Notify::new()));
        *self.ip_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn heal(&self, op: &'static str) {
        self.state.lock().failing.remove(op);
    }

    pub fn has_vm(&self, vm_id: u32) -> bool {
        self.state.lock().vms.contains_key(&vm_id)
    }

    pub fn is_running(&self, vm_id: u32) -> bool {
        self.state.lock().vms.get(&vm_id).copied().unwrap_or(false)
    }

    fn record(&self, op: &'static str, detail: impl std::fmt::Display) -> Result<(), CoreError> {
        self.log.lock().push(format!("hv:{op}:{detail}"));
        if let Some((clock, per_call)) = self.latency.lock().clone() {
            clock.advance(per_call);
        }
        if self.state.lock().failing.contains(op) {
            return Err(CoreError::Network(format!("{op} 실패 (테스트)")));
        }
        Ok(())
    }
}

pub fn telemetry(cpu: f64, ram: f64) -> NodeTelemetry {
    NodeTelemetry {
        cpu,
        mem: (ram * 1000.0) as u64,
        maxmem: 1000,
        maxcpu: 16,
        uptime: 3600,
    }
}

#[async_trait]
impl HypervisorApi for FakeHypervisor {
    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, CoreError> {
        self.record("list_nodes", "-")?;
        Ok(self.state.lock().nodes.clone())
    }

    async fn get_node_status(&self, node: &str) -> Result<NodeTelemetry, CoreError> {
        self.record("get_node_status", node)?;
        self.state
            .lock()
            .telemetry
            .get(node)
            .copied()
            .ok_or_else(|| CoreError::Network(format!("{node} 텔레메트리 없음")))
    }

    async fn clone_template(
        &self,
        _template_id: u32,
        _node: &str,
        new_id: u32,
        name: &str,
    ) -> Result<(), CoreError> {
        self.record("clone_template", new_id)?;
        let mut state = self.state.lock();
        state.vms.insert(new_id, false);
        state.names.insert(new_id, name.to_string());
        Ok(())
    }

    async fn start_vm(&self, _node: &str, vm_id: u32) -> Result<(), CoreError> {
        self.record("start_vm", vm_id)?;
        self.state.lock().vms.insert(vm_id, true);
        Ok(())
    }

    async fn stop_vm(&self, _node: &str, vm_id: u32) -> Result<(), CoreError> {
        self.record("stop_vm", vm_id)?;
        self.state.lock().vms.insert(vm_id, false);
        Ok(())
    }

    async fn delete_vm(&self, _node: &str, vm_id: u32) -> Result<(), CoreError> {
        self.record("delete_vm", vm_id)?;
        let mut state = self.state.lock();
        state.vms.remove(&vm_id);
        state.names.remove(&vm_id);
        Ok(())
    }

    async fn get_vm_status(&self, _node: &str, vm_id: u32) -> Result<VmStatus, CoreError> {
        self.record("get_vm_status", vm_id)?;
        let mut state = self.state.lock();
        let Some(powered) = state.vms.get(&vm_id).copied() else {
            return Err(CoreError::not_found("VM", vm_id));
        };
        state.status_polls += 1;
        let running = powered && state.status_polls > state.polls_until_running;
        Ok(VmStatus {
            status: if running {
                VmPowerState::Running
            } else {
                VmPowerState::Stopped
            },
            name: state.names.get(&vm_id).cloned(),
            uptime: None,
        })
    }

    async fn get_vm_network_ip(
        &self,
        _node: &str,
        vm_id: u32,
    ) -> Result<Option<String>, CoreError> {
        self.record("get_vm_network_ip", vm_id)?;
        let gate = self.ip_gate.lock().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        let mut state = self.state.lock();
        state.ip_polls += 1;
        if state.ip_polls > state.polls_until_ip {
            Ok(Some(state.ip.clone()))
        } else {
            Ok(None)
        }
    }

    async fn rollback_snapshot(
        &self,
        _node: &str,
        vm_id: u32,
        snapshot: &str,
    ) -> Result<(), CoreError> {
        self.record("rollback_snapshot", format!("{vm_id}@{snapshot}"))
    }
}

/// 클러스터 ID별 가짜 하이퍼바이저 제공자
#[derive(Default)]
pub struct FakeConnector {
    clients: Mutex<HashMap<ClusterId, Arc<FakeHypervisor>>>,
}

impl FakeConnector {
    pub fn register(&self, cluster_id: ClusterId, hypervisor: Arc<FakeHypervisor>) {
        self.clients.lock().insert(cluster_id, hypervisor);
    }
}

impl HypervisorConnector for FakeConnector {
    fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn HypervisorApi>, CoreError> {
        self.clients
            .lock()
            .get(&cluster.id)
            .cloned()
            .map(|h| h as Arc<dyn HypervisorApi>)
            .ok_or_else(|| CoreError::Config(format!("클라이언트 없음: {}", cluster.name)))
    }
}

// ============================================================
// 게이트웨이 / 알림
// ============================================================

pub struct FakeGateway {
    log: CallLog,
    pub connections: Mutex<HashMap<String, ConnectionSpec>>,
    failing: Mutex<HashSet<&'static str>>,
    next_id: Mutex<u32>,
}

impl FakeGateway {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            connections: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            next_id: Mutex::new(1),
        }
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    fn record(&self, op: &'static str, detail: &str) -> Result<(), CoreError> {
        self.log.lock().push(format!("gw:{op}:{detail}"));
        if self.failing.lock().contains(op) {
            return Err(CoreError::ServiceUnavailable(format!("{op} 실패 (테스트)")));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayApi for FakeGateway {
    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<String, CoreError> {
        self.record("create_connection", &spec.name)?;
        let mut next = self.next_id.lock();
        let id = format!("c{}", *next);
        *next += 1;
        self.connections.lock().insert(id.clone(), spec.clone());
        Ok(id)
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<(), CoreError> {
        self.record("delete_connection", connection_id)?;
        self.connections.lock().remove(connection_id);
        Ok(())
    }

    async fn generate_auth_token(
        &self,
        connection_id: &str,
        ttl_secs: u64,
    ) -> Result<String, CoreError> {
        self.record("generate_auth_token", connection_id)?;
        Ok(format!("tok-{connection_id}-{ttl_secs}"))
    }

    async fn get_connection(&self, connection_id: &str) -> Result<ConnectionDetails, CoreError> {
        self.record("get_connection", connection_id)?;
        let connections = self.connections.lock();
        let spec = connections
            .get(connection_id)
            .ok_or_else(|| CoreError::not_found("Connection", connection_id))?;
        Ok(ConnectionDetails {
            identifier: connection_id.to_string(),
            name: spec.name.clone(),
            protocol: spec.protocol.as_str().to_string(),
        })
    }

    fn viewer_url(&self, connection_id: &str, token: &str) -> String {
        format!("https://gw.test/#/client/{connection_id}?token={token}")
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<OperatorAlert>>,
}

#[async_trait]
impl OperatorNotifier for RecordingNotifier {
    async fn notify(&self, alert: &OperatorAlert) -> Result<(), CoreError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

// ============================================================
// 인벤토리 픽스처
// ============================================================

pub fn cluster_record(name: &str) -> Cluster {
    Cluster {
        id: ClusterId(0),
        name: name.to_string(),
        host: format!("{name}.pve.test"),
        port: 8006,
        credentials: ClusterCredentials {
            token_id: "root@pam!vmlease".to_string(),
            token_secret: "secret".to_string(),
            verify_tls: false,
        },
        is_active: true,
        max_vms_per_node: 10,
        max_concurrent_sessions: 50,
        cpu_overcommit_ratio: 1.0,
        memory_overcommit_ratio: 1.0,
    }
}

pub fn template_record() -> Template {
    Template {
        id: TemplateId(0),
        name: "ubuntu-desktop".to_string(),
        os_type: "linux".to_string(),
        protocol: Protocol::Rdp,
        hypervisor_template_id: 9000,
        cpu_cores: 2,
        memory_mb: 4096,
        disk_gb: 32,
        is_active: true,
        guest_username: Some("student".to_string()),
        guest_password: Some("pw".to_string()),
        port_override: None,
    }
}

/// 클러스터 + 온라인 노드 등록 → 저장된 클러스터
pub async fn seed_cluster(storage: &SqliteStorage, name: &str, nodes: &[&str]) -> Cluster {
    let mut cluster = cluster_record(name);
    cluster.id = storage.insert_cluster(&cluster).await.unwrap();
    for node in nodes {
        storage
            .upsert_node(&Node {
                cluster_id: cluster.id,
                name: node.to_string(),
                status: NodeStatus::Online,
                max_vms: 10,
            })
            .await
            .unwrap();
    }
    cluster
}

pub async fn seed_template(storage: &SqliteStorage) -> Template {
    let mut template = template_record();
    template.id = storage.insert_template(&template).await.unwrap();
    template
}

// ============================================================
// 엔진 조립
// ============================================================

/// 인메모리 저장소 + 가짜 어댑터로 구성한 테스트 하네스
pub struct Harness {
    pub storage: Arc<SqliteStorage>,
    pub log: CallLog,
    pub hypervisor: Arc<FakeHypervisor>,
    pub connector: Arc<FakeConnector>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub cluster: Cluster,
    pub template: Template,
}

impl Harness {
    /// 클러스터 "alpha"(노드 pve1, pve2) + 템플릿 1개
    pub async fn new() -> Self {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let log = CallLog::default();
        let hypervisor = Arc::new(
            FakeHypervisor::new(log.clone())
                .with_node("pve1", 0.3, 0.4)
                .with_node("pve2", 0.6, 0.6),
        );
        let cluster = seed_cluster(&storage, "alpha", &["pve1", "pve2"]).await;
        let template = seed_template(&storage).await;
        let connector = Arc::new(FakeConnector::default());
        connector.register(cluster.id, hypervisor.clone());

        Self {
            storage,
            gateway: Arc::new(FakeGateway::new(log.clone())),
            log,
            hypervisor,
            connector,
            notifier: Arc::new(RecordingNotifier::default()),
            clock: Arc::new(ManualClock::new(t0())),
            cluster,
            template,
        }
    }

    pub fn context(&self) -> EngineContext {
        EngineContext {
            sessions: self.storage.clone(),
            clusters: self.storage.clone(),
            nodes: self.storage.clone(),
            templates: self.storage.clone(),
            queue: self.storage.clone(),
            connector: self.connector.clone(),
            gateway: self.gateway.clone(),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
        }
    }

    /// 호출 기록 중 접두어가 일치하는 항목
    pub fn calls(&self, prefix: &str) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }
}
