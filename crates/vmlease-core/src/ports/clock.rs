//! 시계 포트.
//!
//! 폴링 대기와 쿼터 계산은 모두 이 포트를 통해 현재 시각과 대기를 얻는다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// 현재 시각 + 비동기 대기
#[async_trait]
pub trait Clock: Send + Sync {
    /// 현재 UTC 시각
    fn now(&self) -> DateTime<Utc>;

    /// 지정 시간 대기
    async fn sleep(&self, duration: Duration);
}

/// 실제 시계 (chrono + tokio)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_clock_sleeps() {
        let clock = SystemClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(20)).await;
        assert!(clock.now() - before >= chrono::Duration::milliseconds(20));
    }
}
