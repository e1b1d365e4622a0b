//! Apache Guacamole REST API 클라이언트.
//!
//! `GatewayApi` 포트 구현. 서비스 계정 토큰 자동 주입 + 재시도 로직.
//! 토큰이 만료되어 401/403이 오면 한 번 재로그인 후 다시 시도한다.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use vmlease_core::error::CoreError;
use vmlease_core::ports::gateway::{ConnectionDetails, ConnectionSpec, GatewayApi};

use crate::auth::{GatewaySession, TokenManager};
use crate::retry::{check_response, map_send_error, RetryPolicy};

/// 로그인 전 뷰어 URL에 쓰는 데이터 소스
const DEFAULT_DATA_SOURCE: &str = "postgresql";

/// 토큰 헤더 이름
const TOKEN_HEADER: &str = "Guacamole-Token";

/// 연결 생성 요청 본문
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateConnectionBody<'a> {
    parent_identifier: &'a str,
    name: &'a str,
    protocol: &'a str,
    parameters: &'a HashMap<String, String>,
    attributes: HashMap<String, String>,
}

/// 뷰어 토큰 응답
#[derive(Debug, Deserialize)]
struct ViewerTokenResponse {
    token: String,
}

/// 클라이언트 식별자: base64(`{id}\0c\0{data_source}`)
fn client_identifier(connection_id: &str, data_source: &str) -> String {
    B64.encode(format!("{connection_id}\0c\0{data_source}"))
}

/// Guacamole 클라이언트 (`GatewayApi` 포트 구현)
pub struct GuacamoleClient {
    client: reqwest::Client,
    base_url: String,
    public_url: String,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
    data_source: RwLock<String>,
}

impl GuacamoleClient {
    /// 새 클라이언트 생성
    ///
    /// `public_url`은 브라우저에 노출되는 주소 (뷰어 URL 생성용).
    pub fn new(
        base_url: &str,
        public_url: &str,
        tokens: Arc<TokenManager>,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
            tokens,
            retry: RetryPolicy::default(),
            data_source: RwLock::new(DEFAULT_DATA_SOURCE.to_string()),
        })
    }

    /// 재시도 정책 설정
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn connections_url(&self, session: &GatewaySession) -> String {
        format!(
            "{}/api/session/data/{}/connections",
            self.base_url, session.data_source
        )
    }

    /// 인증 세션을 주입해 작업 실행
    ///
    /// 인증 에러는 토큰을 폐기하고 한 번만 다시 시도한다.
    async fn call<T, F, Fut>(&self, what: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn(GatewaySession) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut relogged = false;
        loop {
            let result = self
                .retry
                .execute(what, || async {
                    let session = self.tokens.session().await?;
                    *self.data_source.write() = session.data_source.clone();
                    operation(session).await
                })
                .await;

            match result {
                Err(CoreError::Auth(msg)) | Err(CoreError::Forbidden(msg)) if !relogged => {
                    warn!("{what}: 게이트웨이 인증 거부, 재로그인 후 재시도: {msg}");
                    self.tokens.invalidate().await;
                    relogged = true;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl GatewayApi for GuacamoleClient {
    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<String, CoreError> {
        debug!("게이트웨이 연결 생성 요청: name={}", spec.name);
        let what = "게이트웨이 연결 생성";

        let details: ConnectionDetails = self
            .call(what, |session| async move {
                let body = CreateConnectionBody {
                    parent_identifier: "ROOT",
                    name: &spec.name,
                    protocol: spec.protocol.as_str(),
                    parameters: &spec.parameters,
                    attributes: HashMap::new(),
                };
                let resp = self
                    .client
                    .post(self.connections_url(&session))
                    .header(TOKEN_HEADER, &session.token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| map_send_error(what, e))?;
                let resp = check_response(resp, "connection").await?;
                resp.json()
                    .await
                    .map_err(|e| CoreError::Internal(format!("{what} 응답 파싱 실패: {e}")))
            })
            .await?;

        debug!("게이트웨이 연결 생성 성공: id={}", details.identifier);
        Ok(details.identifier)
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<(), CoreError> {
        debug!("게이트웨이 연결 삭제 요청: id={connection_id}");
        let what = "게이트웨이 연결 삭제";

        let result = self
            .call(what, |session| async move {
                let url = format!("{}/{}", self.connections_url(&session), connection_id);
                let resp = self
                    .client
                    .delete(url)
                    .header(TOKEN_HEADER, &session.token)
                    .send()
                    .await
                    .map_err(|e| map_send_error(what, e))?;
                check_response(resp, "connection").await?;
                Ok(())
            })
            .await;

        match result {
            Err(CoreError::NotFound { .. }) => {
                debug!("게이트웨이 연결이 이미 없음: id={connection_id}");
                Ok(())
            }
            other => other,
        }
    }

    async fn generate_auth_token(
        &self,
        connection_id: &str,
        ttl_secs: u64,
    ) -> Result<String, CoreError> {
        let what = "뷰어 토큰 발급";

        let resp: ViewerTokenResponse = self
            .call(what, |session| async move {
                let url = format!(
                    "{}/{}/tokens",
                    self.connections_url(&session),
                    connection_id
                );
                let resp = self
                    .client
                    .post(url)
                    .header(TOKEN_HEADER, &session.token)
                    .json(&serde_json::json!({ "ttl": ttl_secs }))
                    .send()
                    .await
                    .map_err(|e| map_send_error(what, e))?;
                let resp = check_response(resp, "connection").await?;
                resp.json()
                    .await
                    .map_err(|e| CoreError::Internal(format!("{what} 응답 파싱 실패: {e}")))
            })
            .await?;

        Ok(resp.token)
    }

    async fn get_connection(&self, connection_id: &str) -> Result<ConnectionDetails, CoreError> {
        let what = "게이트웨이 연결 조회";

        self.call(what, |session| async move {
            let url = format!("{}/{}", self.connections_url(&session), connection_id);
            let resp = self
                .client
                .get(url)
                .header(TOKEN_HEADER, &session.token)
                .send()
                .await
                .map_err(|e| map_send_error(what, e))?;
            let resp = check_response(resp, "connection").await?;
            resp.json()
                .await
                .map_err(|e| CoreError::Internal(format!("{what} 응답 파싱 실패: {e}")))
        })
        .await
    }

    fn viewer_url(&self, connection_id: &str, token: &str) -> String {
        let data_source = self.data_source.read().clone();
        format!(
            "{}/#/client/{}?token={}",
            self.public_url,
            client_identifier(connection_id, &data_source),
            token
        )
    }
}
