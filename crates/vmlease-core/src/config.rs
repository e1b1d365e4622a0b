//! 애플리케이션 설정 구조체.
//!
//! 배치 임계값, 쿼터, 파이프라인 재시도/타임아웃, VMID 범위, 게이트웨이 접속 정보 등
//! 런타임 설정을 정의한다. 프로세스 시작 시 한 번 만들어 각 컴포넌트에 주입한다.
//! `config` crate를 통해 파일/환경변수에서 로드 (`config_manager` 참조).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP API 서버 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 데이터베이스 설정
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 노드/클러스터 배치 설정
    #[serde(default)]
    pub placement: PlacementConfig,
    /// 사용자 쿼터 설정
    #[serde(default)]
    pub quota: QuotaConfig,
    /// 프로비저닝 파이프라인 설정
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    /// 종료 파이프라인 설정
    #[serde(default)]
    pub termination: TerminationConfig,
    /// 외부 API 호출 재시도 설정
    #[serde(default)]
    pub http_retry: HttpRetryConfig,
    /// 원격 데스크톱 게이트웨이 설정
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// 워커/스케줄러 설정
    #[serde(default)]
    pub worker: WorkerConfig,
    /// 운영자 알림 설정
    #[serde(default)]
    pub notifier: NotifierConfig,
}

// ============================================================
// 서버/DB 설정
// ============================================================

/// HTTP API 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 서버 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 바인드 주소
    #[serde(default = "default_bind_host")]
    pub host: String,
    /// 포트
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_bind_host(),
            port: default_port(),
        }
    }
}

/// 데이터베이스 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite DB 파일 경로 (None이면 플랫폼 기본 경로)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ============================================================
// 배치 설정
// ============================================================

/// 노드 부하 점수 및 과부하 판정 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// RAM 가중치
    #[serde(default = "default_ram_weight")]
    pub ram_weight: f64,
    /// CPU 가중치
    #[serde(default = "default_cpu_weight")]
    pub cpu_weight: f64,
    /// 과부하 임계값 (이 점수를 넘으면 배치 거부)
    #[serde(default = "default_overload_threshold")]
    pub overload_threshold: f64,
    /// 노드 점수 캐시 TTL (초)
    #[serde(default = "default_score_cache_ttl_secs")]
    pub score_cache_ttl_secs: u64,
    /// 점수 캐시 최대 항목 수
    #[serde(default = "default_score_cache_capacity")]
    pub score_cache_capacity: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            ram_weight: default_ram_weight(),
            cpu_weight: default_cpu_weight(),
            overload_threshold: default_overload_threshold(),
            score_cache_ttl_secs: default_score_cache_ttl_secs(),
            score_cache_capacity: default_score_cache_capacity(),
        }
    }
}

// ============================================================
// 쿼터 설정
// ============================================================

/// 사용자별 상한
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// 최대 동시 세션 수
    pub max_sessions: u32,
    /// 동시 잔여 시간 합계 상한 (분)
    pub max_minutes: i64,
}

/// 쿼터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// 기본 최대 동시 세션 수
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    /// 기본 잔여 시간 합계 상한 (분)
    #[serde(default = "default_max_minutes")]
    pub max_minutes: i64,
    /// 요청 1건의 최대 시간 (분)
    #[serde(default = "default_max_request_minutes")]
    pub max_request_minutes: i64,
    /// 사용자별 상한 재지정
    #[serde(default)]
    pub overrides: HashMap<String, QuotaLimits>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_minutes: default_max_minutes(),
            max_request_minutes: default_max_request_minutes(),
            overrides: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    /// 사용자에게 적용되는 상한
    pub fn limits_for(&self, user_id: &str) -> QuotaLimits {
        self.overrides.get(user_id).copied().unwrap_or(QuotaLimits {
            max_sessions: self.max_sessions,
            max_minutes: self.max_minutes,
        })
    }
}

// ============================================================
// 파이프라인 설정
// ============================================================

/// 프로비저닝 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// VMID 할당 범위 하한
    #[serde(default = "default_vmid_min")]
    pub vmid_min: u32,
    /// VMID 할당 범위 상한
    #[serde(default = "default_vmid_max")]
    pub vmid_max: u32,
    /// 단계별 시도 횟수
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 단계 재시도 지연 (초)
    #[serde(default = "default_step_backoff_secs")]
    pub backoff_secs: Vec<u64>,
    /// VM 상태 폴링 간격 (초)
    #[serde(default = "default_boot_poll_interval_secs")]
    pub boot_poll_interval_secs: u64,
    /// running 대기 최대 시간 (초)
    #[serde(default = "default_boot_timeout_secs")]
    pub boot_timeout_secs: u64,
    /// IP 폴링 간격 (초)
    #[serde(default = "default_ip_poll_interval_secs")]
    pub ip_poll_interval_secs: u64,
    /// IP 대기 최대 시간 (초)
    #[serde(default = "default_ip_wait_secs")]
    pub ip_wait_secs: u64,
    /// 최종 실패 시 클론된 VM 자동 삭제
    #[serde(default = "default_true")]
    pub cleanup_on_failure: bool,
    /// VM 이름 접두사
    #[serde(default = "default_vm_name_prefix")]
    pub vm_name_prefix: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            vmid_min: default_vmid_min(),
            vmid_max: default_vmid_max(),
            max_attempts: default_max_attempts(),
            backoff_secs: default_step_backoff_secs(),
            boot_poll_interval_secs: default_boot_poll_interval_secs(),
            boot_timeout_secs: default_boot_timeout_secs(),
            ip_poll_interval_secs: default_ip_poll_interval_secs(),
            ip_wait_secs: default_ip_wait_secs(),
            cleanup_on_failure: true,
            vm_name_prefix: default_vm_name_prefix(),
        }
    }
}

impl ProvisioningConfig {
    /// 한 단계가 폴링으로 기다리는 최대 시간 (초)
    pub fn longest_wait_secs(&self) -> u64 {
        self.boot_timeout_secs.max(self.ip_wait_secs)
    }
}

/// 종료 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationConfig {
    /// 단계별 시도 횟수
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 단계 재시도 지연 (초)
    #[serde(default = "default_step_backoff_secs")]
    pub backoff_secs: Vec<u64>,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_step_backoff_secs(),
        }
    }
}

/// 외부 API 재시도 설정 (지수 백오프)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRetryConfig {
    /// 첫 재시도 지연 (초)
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// 지연 배수
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// 최대 시도 횟수
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 요청 타임아웃 (초)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ============================================================
// 게이트웨이 설정
// ============================================================

/// 원격 데스크톱 게이트웨이 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// 게이트웨이 REST API 기본 URL
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
    /// 서비스 계정 사용자명
    #[serde(default)]
    pub username: String,
    /// 서비스 계정 비밀번호
    #[serde(default)]
    pub password: String,
    /// 브라우저에 노출되는 뷰어 URL (None이면 base_url)
    #[serde(default)]
    pub public_url: Option<String>,
    /// 뷰어 토큰 유효 시간 (초)
    #[serde(default = "default_viewer_token_ttl_secs")]
    pub viewer_token_ttl_secs: u64,
    /// 사용자별 분당 뷰어 토큰 발급 한도
    #[serde(default = "default_viewer_rate_limit")]
    pub viewer_rate_limit_per_minute: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            username: String::new(),
            password: String::new(),
            public_url: None,
            viewer_token_ttl_secs: default_viewer_token_ttl_secs(),
            viewer_rate_limit_per_minute: default_viewer_rate_limit(),
        }
    }
}

// ============================================================
// 워커/스케줄러 설정
// ============================================================

/// 워커 풀과 주기 작업 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 동시 워커 수
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 큐가 비었을 때 폴링 간격 (밀리초)
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// 작업 임대 시간 (초). 가장 긴 폴링 단계보다 길어야 한다
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// 만료 세션 스윕 간격 (초)
    #[serde(default = "default_expiry_sweep_secs")]
    pub expiry_sweep_secs: u64,
    /// 만료 임대 복구 간격 (초)
    #[serde(default = "default_lease_recovery_secs")]
    pub lease_recovery_secs: u64,
    /// 노드 인벤토리 동기화 간격 (초)
    #[serde(default = "default_node_sync_secs")]
    pub node_sync_secs: u64,
    /// 완료 작업 보존 기간 (일)
    #[serde(default = "default_task_retention_days")]
    pub task_retention_days: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            idle_poll_ms: default_idle_poll_ms(),
            lease_secs: default_lease_secs(),
            expiry_sweep_secs: default_expiry_sweep_secs(),
            lease_recovery_secs: default_lease_recovery_secs(),
            node_sync_secs: default_node_sync_secs(),
            task_retention_days: default_task_retention_days(),
        }
    }
}

/// 운영자 알림 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// 웹훅 URL (None이면 로그만)
    #[serde(default)]
    pub webhook_url: Option<String>,
}

// ============================================================
// AppConfig impl
// ============================================================

impl AppConfig {
    /// 기본 설정값 반환
    pub fn default_config() -> Self {
        Self::default()
    }

    /// 설정값 유효성 검증
    pub fn validate(&self) -> Result<(), CoreError> {
        let p = &self.placement;
        if p.ram_weight < 0.0 || p.cpu_weight < 0.0 || (p.ram_weight + p.cpu_weight - 1.0).abs() > 1e-6
        {
            return Err(CoreError::Config(format!(
                "부하 가중치 합은 1이어야 합니다 (ram={}, cpu={})",
                p.ram_weight, p.cpu_weight
            )));
        }
        if !(p.overload_threshold > 0.0 && p.overload_threshold <= 1.0) {
            return Err(CoreError::Config(format!(
                "과부하 임계값은 (0, 1] 범위여야 합니다: {}",
                p.overload_threshold
            )));
        }

        let prov = &self.provisioning;
        if prov.vmid_min > prov.vmid_max {
            return Err(CoreError::Config(format!(
                "VMID 범위가 비어 있습니다: {}..={}",
                prov.vmid_min, prov.vmid_max
            )));
        }
        if prov.boot_poll_interval_secs == 0 || prov.ip_poll_interval_secs == 0 {
            return Err(CoreError::Config("폴링 간격은 0보다 커야 합니다".to_string()));
        }
        if prov.boot_poll_interval_secs > prov.boot_timeout_secs {
            return Err(CoreError::Config(
                "부팅 폴링 간격이 타임아웃보다 깁니다".to_string(),
            ));
        }

        for (name, attempts, backoff) in [
            ("provisioning", prov.max_attempts, &prov.backoff_secs),
            (
                "termination",
                self.termination.max_attempts,
                &self.termination.backoff_secs,
            ),
        ] {
            if attempts == 0 {
                return Err(CoreError::Config(format!(
                    "{name}.max_attempts는 1 이상이어야 합니다"
                )));
            }
            if backoff.is_empty() {
                return Err(CoreError::Config(format!(
                    "{name}.backoff_secs가 비어 있습니다"
                )));
            }
        }

        if self.http_retry.max_attempts == 0 || self.http_retry.multiplier == 0 {
            return Err(CoreError::Config(
                "http_retry 시도 횟수와 배수는 1 이상이어야 합니다".to_string(),
            ));
        }
        if self.quota.max_request_minutes <= 0 {
            return Err(CoreError::Config(
                "quota.max_request_minutes는 양수여야 합니다".to_string(),
            ));
        }
        // 폴링 단계 하나가 임대보다 길면 하트비트가 한 번만 늦어도 다른 워커가 가져간다
        let step_budget = prov.longest_wait_secs() + self.http_retry.request_timeout_secs;
        if self.worker.lease_secs <= step_budget {
            return Err(CoreError::Config(format!(
                "worker.lease_secs({})는 가장 긴 폴링 단계({step_budget}초)보다 길어야 합니다",
                self.worker.lease_secs
            )));
        }
        if self.worker.concurrency == 0 {
            return Err(CoreError::Config(
                "worker.concurrency는 1 이상이어야 합니다".to_string(),
            ));
        }

        Ok(())
    }

    /// 외부 API 요청 타임아웃
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http_retry.request_timeout_secs)
    }

    /// 노드 점수 캐시 TTL
    pub fn score_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.placement.score_cache_ttl_secs)
    }

    /// 작업 임대 시간
    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.worker.lease_secs as i64)
    }

    /// 게이트웨이 뷰어 URL 기준
    pub fn viewer_base_url(&self) -> &str {
        self.gateway
            .public_url
            .as_deref()
            .unwrap_or(&self.gateway.base_url)
    }
}

// ============================================================
// 기본값 함수
// ============================================================

fn default_true() -> bool {
    true
}
fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ram_weight() -> f64 {
    0.7
}
fn default_cpu_weight() -> f64 {
    0.3
}
fn default_overload_threshold() -> f64 {
    0.85
}
fn default_score_cache_ttl_secs() -> u64 {
    30
}
fn default_score_cache_capacity() -> usize {
    512
}
fn default_max_sessions() -> u32 {
    3
}
fn default_max_minutes() -> i64 {
    240
}
fn default_max_request_minutes() -> i64 {
    480
}
fn default_vmid_min() -> u32 {
    200
}
fn default_vmid_max() -> u32 {
    999
}
fn default_max_attempts() -> u32 {
    3
}
fn default_step_backoff_secs() -> Vec<u64> {
    vec![10, 30, 60]
}
fn default_boot_poll_interval_secs() -> u64 {
    5
}
fn default_boot_timeout_secs() -> u64 {
    300
}
fn default_ip_poll_interval_secs() -> u64 {
    2
}
fn default_ip_wait_secs() -> u64 {
    300
}
fn default_vm_name_prefix() -> String {
    "vmlease".to_string()
}
fn default_initial_delay_secs() -> u64 {
    10
}
fn default_multiplier() -> u32 {
    3
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_gateway_url() -> String {
    "http://localhost:8081/guacamole".to_string()
}
fn default_viewer_token_ttl_secs() -> u64 {
    300
}
fn default_viewer_rate_limit() -> u32 {
    10
}
fn default_concurrency() -> usize {
    4
}
fn default_idle_poll_ms() -> u64 {
    1_000
}
fn default_lease_secs() -> u64 {
    900 // 15분
}
fn default_expiry_sweep_secs() -> u64 {
    60
}
fn default_lease_recovery_secs() -> u64 {
    120
}
fn default_node_sync_secs() -> u64 {
    300
}
fn default_task_retention_days() -> u32 {
    14
}
