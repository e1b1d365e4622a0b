//! 운영자 알림 디스패처.
//!
//! 모든 알림을 `error!` 로그로 남기고, 웹훅이 설정되어 있으면 이어서 전달한다.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};
use vmlease_core::error::CoreError;
use vmlease_core::ports::notifier::{OperatorAlert, OperatorNotifier};

/// 로그 + 선택적 웹훅 알림기
pub struct LogNotifier {
    forward: Option<Arc<dyn OperatorNotifier>>,
}

impl LogNotifier {
    /// 로그만 남기는 알림기
    pub fn new() -> Self {
        Self { forward: None }
    }

    /// 로그 후 `forward`로 전달
    pub fn forwarding_to(forward: Arc<dyn OperatorNotifier>) -> Self {
        Self {
            forward: Some(forward),
        }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperatorNotifier for LogNotifier {
    async fn notify(&self, alert: &OperatorAlert) -> Result<(), CoreError> {
        error!(
            kind = ?alert.kind,
            session = %alert.session_id,
            "운영자 조치 필요: {}",
            alert.message
        );

        if let Some(forward) = &self.forward {
            if let Err(e) = forward.notify(alert).await {
                warn!("운영자 웹훅 전달 실패: {e}");
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use vmlease_core::models::session::SessionId;
    use vmlease_core::ports::notifier::AlertKind;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OperatorNotifier for Recorder {
        async fn notify(&self, alert: &OperatorAlert) -> Result<(), CoreError> {
            self.seen.lock().push(alert.message.clone());
            Ok(())
        }
    }

    fn alert() -> OperatorAlert {
        OperatorAlert {
            kind: AlertKind::TerminationIncomplete,
            session_id: SessionId::new(),
            message: "VM 210@pve1 수동 정리 필요".to_string(),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn log_only_succeeds() {
        LogNotifier::new().notify(&alert()).await.unwrap();
    }

    #[tokio::test]
    async fn forwards_after_logging() {
        let recorder = Arc::new(Recorder::default());
        let notifier = LogNotifier::forwarding_to(recorder.clone());
        notifier.notify(&alert()).await.unwrap();
        assert_eq!(recorder.seen.lock().len(), 1);
    }
}
