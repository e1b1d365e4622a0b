//! 웹훅 운영자 알림.
//!
//! `OperatorNotifier` 포트 구현. 알림을 JSON으로 POST한다.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use vmlease_core::error::CoreError;
use vmlease_core::ports::notifier::{OperatorAlert, OperatorNotifier};

use crate::retry::{check_response, map_send_error, RetryPolicy};

/// 웹훅 알림기
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    /// 새 알림기 생성
    pub fn new(url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            retry,
        })
    }
}

#[async_trait]
impl OperatorNotifier for WebhookNotifier {
    async fn notify(&self, alert: &OperatorAlert) -> Result<(), CoreError> {
        let what = "운영자 웹훅 전송";
        self.retry
            .execute(what, || async {
                let resp = self
                    .client
                    .post(&self.url)
                    .json(alert)
                    .send()
                    .await
                    .map_err(|e| map_send_error(what, e))?;
                check_response(resp, "webhook").await?;
                Ok(())
            })
            .await?;

        debug!("운영자 알림 전송: session={}", alert.session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockito::Matcher;
    use vmlease_core::models::session::SessionId;
    use vmlease_core::ports::notifier::AlertKind;

    #[tokio::test]
    async fn posts_alert_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/vmlease")
            .match_body(Matcher::PartialJsonString(
                r#"{"kind":"provisioning_failed","message":"clone 실패"}"#.to_string(),
            ))
            .with_status(204)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(
            &format!("{}/hooks/vmlease", server.url()),
            Duration::from_secs(5),
            RetryPolicy::immediate(1),
        )
        .unwrap();

        let alert = OperatorAlert {
            kind: AlertKind::ProvisioningFailed,
            session_id: SessionId::new(),
            message: "clone 실패".to_string(),
            occurred_at: Utc::now(),
        };
        notifier.notify(&alert).await.unwrap();
        mock.assert_async().await;
    }
}
