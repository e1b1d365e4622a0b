//! # vmlease-network
//!
//! 외부 API 네트워크 어댑터.
//! 하이퍼바이저(Proxmox VE) REST API, 원격 데스크톱 게이트웨이(Guacamole) REST API,
//! 운영자 웹훅 호출을 담당하며 공통 재시도 정책과 상태 코드 매핑을 제공한다.
//!
//! ## 사용 예시
//!
//! ```rust,ignore
//! use vmlease_network::connector::ProxmoxConnector;
//! use vmlease_network::guacamole_client::GuacamoleClient;
//! use vmlease_network::retry::RetryPolicy;
//! ```

pub mod auth;
pub mod connector;
pub mod guacamole_client;
pub mod proxmox_client;
pub mod retry;
pub mod webhook_notifier;
