//! 뷰어 URL 발급 속도 제한.
//!
//! 사용자별 최근 1분 발급 시각을 슬라이딩 윈도로 유지한다.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;
use vmlease_core::error::CoreError;
use vmlease_core::ports::clock::Clock;

/// 사용자별 슬라이딩 윈도 제한기
pub struct ViewerRateLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    hits: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl ViewerRateLimiter {
    /// 분당 `limit`회 제한기
    pub fn per_minute(limit: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window: Duration::minutes(1),
            clock,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// 발급 1회 기록. 한도를 넘으면 기록하지 않고 거부한다
    pub fn check(&self, user_id: &str) -> Result<(), CoreError> {
        let now = self.clock.now();
        let mut hits = self.hits.lock();
        let recent = hits.entry(user_id.to_string()).or_default();

        while recent.front().is_some_and(|t| now - *t >= self.window) {
            recent.pop_front();
        }

        if recent.len() >= self.limit as usize {
            debug!("뷰어 발급 제한: user={user_id} ({}회/분)", self.limit);
            return Err(CoreError::ViewerRateLimited { limit: self.limit });
        }

        recent.push_back(now);
        Ok(())
    }

    /// 윈도 밖 기록만 남은 사용자 정리
    pub fn prune(&self) {
        let now = self.clock.now();
        self.hits
            .lock()
            .retain(|_, recent| recent.back().is_some_and(|t| now - *t < self.window));
    }
}
