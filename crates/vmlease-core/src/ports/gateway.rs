//! 원격 데스크톱 게이트웨이 포트.
//!
//! 구현: `vmlease-network` crate (reqwest, Guacamole REST API)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreError;
use crate::models::template::Protocol;

/// 연결 생성 요청
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSpec {
    /// 연결 이름
    pub name: String,
    /// 프로토콜
    pub protocol: Protocol,
    /// 프로토콜별 파라미터 (hostname, port, username ...)
    pub parameters: HashMap<String, String>,
}

/// 연결 상세
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionDetails {
    /// 연결 ID
    pub identifier: String,
    /// 연결 이름
    pub name: String,
    /// 프로토콜 이름
    pub protocol: String,
}

/// 원격 데스크톱 게이트웨이 API
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// 연결 생성 → 연결 ID
    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<String, CoreError>;

    /// 연결 삭제 (이미 없으면 성공으로 간주)
    async fn delete_connection(&self, connection_id: &str) -> Result<(), CoreError>;

    /// 단기 뷰어 토큰 발급
    async fn generate_auth_token(
        &self,
        connection_id: &str,
        ttl_secs: u64,
    ) -> Result<String, CoreError>;

    /// 연결 상세 조회
    async fn get_connection(&self, connection_id: &str) -> Result<ConnectionDetails, CoreError>;

    /// 연결 ID + 토큰으로 뷰어 URL 생성
    fn viewer_url(&self, connection_id: &str, token: &str) -> String;
}
