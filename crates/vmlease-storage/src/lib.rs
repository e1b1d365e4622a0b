//! # vmlease-storage
//!
//! 로컬 저장소 어댑터.
//! SQLite 기반 세션/인벤토리 저장, 파이프라인 작업 큐, 스키마 마이그레이션을 관리한다.
//!
//! ## 모듈
//! - `sqlite`: 저장소 포트 + 작업 큐 구현
//! - `migration`: 스키마 마이그레이션

pub mod migration;
pub mod sqlite;
