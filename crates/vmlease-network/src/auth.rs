//! 게이트웨이 서비스 계정 인증 토큰 관리.
//!
//! 로그인, 만료 전 재로그인, 인증 실패 시 무효화를 담당한다.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use vmlease_core::error::CoreError;

/// 게이트웨이가 세션 토큰을 유지하는 기본 시간 (유휴 만료보다 짧게)
const SESSION_LIFETIME_MINUTES: i64 = 50;

/// 서버 응답: 로그인
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    auth_token: String,
    data_source: String,
}

/// 인증된 게이트웨이 세션
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySession {
    /// API 토큰 (`Guacamole-Token` 헤더)
    pub token: String,
    /// 연결이 저장되는 데이터 소스 이름
    pub data_source: String,
}

/// 내부 토큰 상태
#[derive(Debug, Clone)]
struct TokenState {
    session: GatewaySession,
    expires_at: DateTime<Utc>,
}

/// 게이트웨이 토큰 매니저
#[derive(Clone)]
pub struct TokenManager {
    base_url: String,
    client: reqwest::Client,
    username: String,
    password: String,
    state: Arc<RwLock<Option<TokenState>>>,
}

impl TokenManager {
    /// 새 토큰 매니저 생성
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            username: username.to_string(),
            password: password.to_string(),
            state: Arc::new(RwLock::new(None)),
        }
    }

    /// 서비스 계정 로그인 → 토큰 + 데이터 소스 획득
    pub async fn login(&self) -> Result<GatewaySession, CoreError> {
        let url = format!("{}/api/tokens", self.base_url);
        let form = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];

        let resp = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CoreError::Network(format!("게이트웨이 로그인 요청 실패: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(CoreError::Auth(format!(
                "게이트웨이 로그인 실패 ({status}): {text}"
            )));
        }

        let token_resp: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::Auth(format!("토큰 파싱 실패: {e}")))?;

        let session = GatewaySession {
            token: token_resp.auth_token,
            data_source: token_resp.data_source,
        };
        let expires_at = Utc::now() + Duration::minutes(SESSION_LIFETIME_MINUTES);

        let mut state = self.state.write().await;
        *state = Some(TokenState {
            session: session.clone(),
            expires_at,
        });

        debug!(
            "게이트웨이 로그인 성공: data_source={}, 만료: {expires_at}",
            session.data_source
        );
        Ok(session)
    }

    /// 유효한 세션 반환 (없거나 만료됐으면 로그인)
    pub async fn session(&self) -> Result<GatewaySession, CoreError> {
        {
            let state = self.state.read().await;
            if let Some(s) = state.as_ref() {
                if Utc::now() < s.expires_at {
                    return Ok(s.session.clone());
                }
            }
        }
        self.login().await
    }

    /// 현재 토큰 폐기 (다음 호출 시 재로그인)
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        *state = None;
        debug!("게이트웨이 토큰 폐기");
    }

    /// 마지막으로 확인된 데이터 소스
    pub async fn data_source(&self) -> Option<String> {
        let state = self.state.read().await;
        state.as_ref().map(|s| s.session.data_source.clone())
    }

    /// 현재 인증 상태 확인
    pub async fn is_authenticated(&self) -> bool {
        let state = self.state.read().await;
        state.as_ref().is_some_and(|s| Utc::now() < s.expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_manager_trailing_slash() {
        let tm = TokenManager::new("http://localhost:8081/guacamole/", "svc", "pw");
        assert_eq!(tm.base_url, "http://localhost:8081/guacamole");
    }

    #[tokio::test]
    async fn unauthenticated_state() {
        let tm = TokenManager::new("http://localhost:8081", "svc", "pw");
        assert!(!tm.is_authenticated().await);
        assert!(tm.data_source().await.is_none());
    }

    #[tokio::test]
    async fn login_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/tokens")
            .match_body(mockito::Matcher::UrlEncoded(
                "username".into(),
                "svc".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"authToken":"T1","username":"svc","dataSource":"postgresql","availableDataSources":["postgresql"]}"#)
            .create_async()
            .await;

        let tm = TokenManager::new(&server.url(), "svc", "pw");
        let session = tm.login().await.unwrap();
        assert_eq!(session.token, "T1");
        assert_eq!(session.data_source, "postgresql");
        assert!(tm.is_authenticated().await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn session_reuses_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/tokens")
            .with_status(200)
            .with_body(r#"{"authToken":"T1","dataSource":"mysql"}"#)
            .expect(1)
            .create_async()
            .await;

        let tm = TokenManager::new(&server.url(), "svc", "pw");
        tm.session().await.unwrap();
        tm.session().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn invalidate_forces_login() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/tokens")
            .with_status(200)
            .with_body(r#"{"authToken":"T1","dataSource":"mysql"}"#)
            .expect(2)
            .create_async()
            .await;

        let tm = TokenManager::new(&server.url(), "svc", "pw");
        tm.session().await.unwrap();
        tm.invalidate().await;
        tm.session().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn login_failure_403() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/tokens")
            .with_status(403)
            .with_body(r#"{"message":"Permission Denied.","type":"INVALID_CREDENTIALS"}"#)
            .create_async()
            .await;

        let tm = TokenManager::new(&server.url(), "svc", "wrong");
        let err = tm.login().await.unwrap_err();
        assert!(matches!(err, CoreError::Auth(_)));
        assert!(err.to_string().contains("게이트웨이 로그인 실패"));
    }
}
