//! # vmlease-engine
//!
//! 세션 오케스트레이션 엔진.
//! 노드/클러스터 배치, 사용자 쿼터, 프로비저닝/종료 파이프라인과
//! 이를 구동하는 작업 런타임을 포함한다.
//!
//! ## 모듈
//! - `scorer`: 노드 부하 점수 + TTL 캐시
//! - `context`: 공유 포트 묶음
//! - `node_selector`, `cluster_selector`: 배치
//! - `quota`: 사용자 쿼터 승인
//! - `vmid`: VMID 할당
//! - `ip_resolver`: 게스트 IP 폴링
//! - `provisioning`, `termination`, `expiry`: 파이프라인 단계 처리기
//! - `extension`: 세션 연장
//! - `rate_limit`: 뷰어 URL 발급 속도 제한
//! - `session_service`: 세션 라이프사이클 진입점
//! - `runtime`: 작업 큐 워커
//! - `inventory`: 하이퍼바이저 노드 목록 동기화
//! - `builder`: 설정 + 어댑터로 엔진 조립

pub mod builder;
pub mod cluster_selector;
pub mod context;
pub mod expiry;
pub mod extension;
pub mod inventory;
pub mod ip_resolver;
pub mod node_selector;
pub mod provisioning;
pub mod quota;
pub mod rate_limit;
pub mod runtime;
pub mod scorer;
pub mod session_service;
pub mod termination;
pub mod vmid;

#[cfg(test)]
pub(crate) mod test_support;

pub use builder::Engine;
