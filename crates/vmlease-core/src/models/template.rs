//! 템플릿 카탈로그 모델.
//!
//! 세션이 참조만 하고 변경하지 않는 불변 항목.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// 템플릿 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub i64);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 원격 데스크톱 프로토콜
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rdp,
    Vnc,
    Ssh,
}

impl Protocol {
    /// 게이트웨이 프로토콜 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Rdp => "rdp",
            Protocol::Vnc => "vnc",
            Protocol::Ssh => "ssh",
        }
    }

    /// 프로토콜 기본 포트
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Rdp => 3389,
            Protocol::Vnc => 5900,
            Protocol::Ssh => 22,
        }
    }
}

impl FromStr for Protocol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rdp" => Ok(Protocol::Rdp),
            "vnc" => Ok(Protocol::Vnc),
            "ssh" => Ok(Protocol::Ssh),
            other => Err(CoreError::validation(
                "protocol",
                format!("지원하지 않는 프로토콜: {other}"),
            )),
        }
    }
}

/// VM 템플릿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// 템플릿 ID
    pub id: TemplateId,
    /// 표시 이름
    pub name: String,
    /// OS 종류 (예: "windows", "ubuntu")
    pub os_type: String,
    /// 원격 접속 프로토콜
    pub protocol: Protocol,
    /// 하이퍼바이저 템플릿 VMID
    pub hypervisor_template_id: u32,
    /// 기본 vCPU 수
    pub cpu_cores: u32,
    /// 기본 메모리 (MB)
    pub memory_mb: u64,
    /// 기본 디스크 (GB)
    pub disk_gb: u64,
    /// 카탈로그 노출 여부
    pub is_active: bool,
    /// 게스트 로그인 사용자 (게이트웨이 연결 파라미터)
    #[serde(default)]
    pub guest_username: Option<String>,
    /// 게스트 로그인 비밀번호
    #[serde(default)]
    pub guest_password: Option<String>,
    /// 프로토콜 포트 재지정
    #[serde(default)]
    pub port_override: Option<u16>,
}

impl Template {
    /// 접속 포트
    pub fn connection_port(&self) -> u16 {
        self.port_override
            .unwrap_or_else(|| self.protocol.default_port())
    }

    /// 게이트웨이 연결 파라미터 (프로토콜별)
    pub fn connection_parameters(&self, hostname: &str) -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert("hostname".to_string(), hostname.to_string());
        params.insert("port".to_string(), self.connection_port().to_string());

        match self.protocol {
            Protocol::Rdp => {
                if let Some(user) = &self.guest_username {
                    params.insert("username".to_string(), user.clone());
                }
                if let Some(password) = &self.guest_password {
                    params.insert("password".to_string(), password.clone());
                }
                params.insert("security".to_string(), "any".to_string());
                params.insert("ignore-cert".to_string(), "true".to_string());
            }
            Protocol::Vnc => {
                // VNC는 비밀번호만 사용
                if let Some(password) = &self.guest_password {
                    params.insert("password".to_string(), password.clone());
                }
            }
            Protocol::Ssh => {
                if let Some(user) = &self.guest_username {
                    params.insert("username".to_string(), user.clone());
                }
                if let Some(password) = &self.guest_password {
                    params.insert("password".to_string(), password.clone());
                }
            }
        }

        params
    }
}
