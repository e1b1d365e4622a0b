//! 사용자 쿼터 승인.
//!
//! 두 가지 상한을 본다.
//! - 동시 세션 수: pending/provisioning/active 세션 수
//! - 동시 잔여 시간 합계: 쿼터 대상 세션의 남은 분 합계 + 요청 분
//!
//! 연장은 세션 수를 늘리지 않으므로 시간 합계만 검사한다.

use std::sync::Arc;
use tracing::debug;
use vmlease_core::config::{QuotaConfig, QuotaLimits};
use vmlease_core::error::{CoreError, QuotaRejection};
use vmlease_core::models::session::Session;
use vmlease_core::ports::clock::Clock;
use vmlease_core::ports::repository::SessionRepository;

/// 쿼터 검사기
pub struct QuotaGuard {
    sessions: Arc<dyn SessionRepository>,
    config: QuotaConfig,
    clock: Arc<dyn Clock>,
}

impl QuotaGuard {
    /// 새 검사기 생성
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        config: QuotaConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            config,
            clock,
        }
    }

    /// 요청 1건의 시간 범위 검증
    pub fn validate_request_minutes(&self, minutes: i64) -> Result<(), CoreError> {
        if minutes <= 0 || minutes > self.config.max_request_minutes {
            return Err(CoreError::validation(
                "duration_minutes",
                format!("1~{}분 사이여야 합니다", self.config.max_request_minutes),
            ));
        }
        Ok(())
    }

    /// 새 세션 생성 승인
    pub async fn admit_new(&self, user_id: &str, minutes: i64) -> Result<(), CoreError> {
        self.validate_request_minutes(minutes)?;
        let held = self.sessions.list_active_by_user(user_id).await?;
        let limits = self.config.limits_for(user_id);
        check_new_session(&held, &limits, minutes, self.clock.now())?;
        debug!("쿼터 승인: user={user_id}, 요청 {minutes}분");
        Ok(())
    }

    /// 연장 승인 (추가 분만 검사)
    pub async fn admit_extension(&self, user_id: &str, minutes: i64) -> Result<(), CoreError> {
        self.validate_request_minutes(minutes)?;
        let held = self.sessions.list_active_by_user(user_id).await?;
        let limits = self.config.limits_for(user_id);
        check_minutes(&held, &limits, minutes, self.clock.now())?;
        debug!("연장 쿼터 승인: user={user_id}, 추가 {minutes}분");
        Ok(())
    }
}

/// 현재 잔여 시간 합계 (분)
pub fn held_minutes(held: &[Session], now: chrono::DateTime<chrono::Utc>) -> i64 {
    held.iter()
        .filter(|s| s.status.counts_toward_quota())
        .map(|s| s.remaining_minutes(now))
        .sum()
}

fn check_new_session(
    held: &[Session],
    limits: &QuotaLimits,
    requested: i64,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), QuotaRejection> {
    let active = held
        .iter()
        .filter(|s| s.status.counts_toward_quota())
        .count() as u32;
    if active >= limits.max_sessions {
        return Err(QuotaRejection::TooManySessions {
            active,
            max: limits.max_sessions,
        });
    }
    check_minutes(held, limits, requested, now)
}

fn check_minutes(
    held: &[Session],
    limits: &QuotaLimits,
    requested: i64,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), QuotaRejection> {
    let current = held_minutes(held, now);
    if current + requested > limits.max_minutes {
        return Err(QuotaRejection::MinutesExceeded {
            current,
            requested,
            max: limits.max_minutes,
        });
    }
    Ok(())
}
