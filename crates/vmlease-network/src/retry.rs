//! 외부 API 호출 재시도 정책과 HTTP 상태 코드 매핑.
//!
//! 하이퍼바이저/게이트웨이 클라이언트가 공통으로 사용한다.
//! 일시적 장애(네트워크, 408/429/503/504)만 지수 백오프로 재시도하고
//! 그 외 4xx/5xx는 즉시 `CoreError::Api`로 반환한다.

use std::future::Future;
use std::time::Duration;

use vmlease_core::config::HttpRetryConfig;
use vmlease_core::error::CoreError;
use tracing::warn;

/// 지수 백오프 재시도 정책
///
/// `n`번째 실패 후 대기 = `initial_delay * multiplier^(n-1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 첫 재시도 전 대기
    pub initial_delay: Duration,
    /// 지연 배수
    pub multiplier: u32,
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HttpRetryConfig::default())
    }
}

impl RetryPolicy {
    /// 설정에서 정책 생성
    pub fn from_config(config: &HttpRetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// 대기 없이 재시도하는 정책
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            multiplier: 1,
            max_attempts: max_attempts.max(1),
        }
    }

    /// `attempt`번째(1부터) 실패 후 대기 시간
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }

    /// 재시도를 포함해 작업 실행
    ///
    /// 일시적 에러가 아니거나 시도 횟수를 모두 쓰면 마지막 에러를 그대로 반환한다.
    pub async fn execute<F, Fut, T>(&self, what: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_transient() || attempt >= self.max_attempts {
                        return Err(e);
                    }

                    let mut delay = self.delay_after(attempt);
                    if let CoreError::RateLimit { retry_after_secs } = &e {
                        delay = delay.max(Duration::from_secs(*retry_after_secs));
                    }

                    warn!(
                        "{what} 실패 (시도 {attempt}/{}): {e}, {delay:?} 후 재시도",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// reqwest 전송 에러 매핑
pub fn map_send_error(what: &str, error: reqwest::Error) -> CoreError {
    if error.is_timeout() {
        CoreError::RequestTimeout(format!("{what}: {error}"))
    } else {
        CoreError::Network(format!("{what} 요청 실패: {error}"))
    }
}

/// 응답 상태 코드 확인 및 에러 매핑
///
/// `resource`는 404일 때 `NotFound`의 리소스 이름으로 쓰인다.
pub async fn check_response(
    resp: reqwest::Response,
    resource: &str,
) -> Result<reqwest::Response, CoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after_secs = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);

    let text = resp.text().await.unwrap_or_else(|e| {
        warn!("응답 본문 읽기 실패: {e}");
        String::new()
    });

    Err(status_error(status.as_u16(), text, resource, retry_after_secs))
}

/// 상태 코드 → `CoreError`
pub fn status_error(status: u16, text: String, resource: &str, retry_after_secs: u64) -> CoreError {
    match status {
        401 => CoreError::Auth(format!("인증 실패: {text}")),
        403 => CoreError::Forbidden(text),
        404 => CoreError::NotFound {
            resource_type: resource.to_string(),
            id: text,
        },
        408 => CoreError::RequestTimeout(text),
        429 => CoreError::RateLimit { retry_after_secs },
        503 => CoreError::ServiceUnavailable(text),
        504 => CoreError::GatewayTimeout(text),
        _ => CoreError::Api {
            status,
            message: text,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_delays_grow_by_multiplier() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(2), Duration::from_secs(30));
        assert_eq!(policy.delay_after(3), Duration::from_secs(90));
    }

    #[test]
    fn status_mapping() {
        assert!(status_error(408, String::new(), "vm", 0).is_transient());
        assert!(status_error(429, String::new(), "vm", 0).is_transient());
        assert!(status_error(503, String::new(), "vm", 0).is_transient());
        assert!(status_error(504, String::new(), "vm", 0).is_transient());
        assert_matches!(
            status_error(400, "bad".into(), "vm", 0),
            CoreError::Api { status: 400, .. }
        );
        assert_matches!(
            status_error(500, "boom".into(), "vm", 0),
            CoreError::Api { status: 500, .. }
        );
        assert_matches!(
            status_error(404, "x".into(), "vm", 0),
            CoreError::NotFound { .. }
        );
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .execute("테스트", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(CoreError::ServiceUnavailable("busy".into()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .execute("테스트", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::Network("down".into()))
            })
            .await;

        assert_matches!(result, Err(CoreError::Network(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn domain_rejection_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .execute("테스트", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::Api {
                    status: 400,
                    message: "invalid".into(),
                })
            })
            .await;

        assert_matches!(result, Err(CoreError::Api { status: 400, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
