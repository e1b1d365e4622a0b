//! VMLEASE 도메인 모델.
//!
//! 엔티티 간 관계는 객체 그래프가 아니라 ID로 표현하고,
//! 저장소 포트를 통해 조회한다.

pub mod cluster;
pub mod session;
pub mod task;
pub mod telemetry;
pub mod template;
