//! 게스트 IP 확인.
//!
//! VM이 running이고 게스트 에이전트가 IPv4를 보고할 때까지 일정 간격으로 폴링한다.
//! 에이전트가 아직 응답하지 않는 동안의 조회 에러는 "아직 없음"으로 취급한다.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vmlease_core::config::ProvisioningConfig;
use vmlease_core::error::CoreError;
use vmlease_core::ports::clock::Clock;
use vmlease_core::ports::hypervisor::HypervisorApi;

/// 게스트 IP 폴러
pub struct IpResolver {
    clock: Arc<dyn Clock>,
    interval: Duration,
    max_wait: Duration,
}

impl IpResolver {
    /// 새 폴러 생성
    pub fn new(clock: Arc<dyn Clock>, interval: Duration, max_wait: Duration) -> Self {
        Self {
            clock,
            interval,
            max_wait,
        }
    }

    /// 프로비저닝 설정으로 생성
    pub fn from_config(clock: Arc<dyn Clock>, config: &ProvisioningConfig) -> Self {
        Self::new(
            clock,
            Duration::from_secs(config.ip_poll_interval_secs),
            Duration::from_secs(config.ip_wait_secs),
        )
    }

    /// 게스트 IPv4 주소 확인
    ///
    /// 대기 한도는 시계 기준이다. 하이퍼바이저 호출에 걸린 시간도 한도에 포함된다.
    pub async fn resolve(
        &self,
        api: &dyn HypervisorApi,
        node: &str,
        vm_id: u32,
    ) -> Result<String, CoreError> {
        let started = self.clock.now();
        let deadline = started + wait_budget(self.max_wait)?;
        let mut poll = 0u32;

        loop {
            poll += 1;
            match api.get_vm_status(node, vm_id).await {
                Ok(status) if status.is_running() => {
                    match api.get_vm_network_ip(node, vm_id).await {
                        Ok(Some(ip)) => {
                            info!("게스트 IP 확인: vm={vm_id}, ip={ip} ({poll}회째)");
                            return Ok(ip);
                        }
                        Ok(None) => debug!("게스트 IP 아직 없음: vm={vm_id}"),
                        Err(e) => debug!("게스트 에이전트 응답 없음: vm={vm_id}: {e}"),
                    }
                }
                Ok(status) => debug!("VM 대기 중: vm={vm_id}, 상태={:?}", status.status),
                Err(e) if e.is_permanent() => return Err(e),
                Err(e) => debug!("VM 상태 조회 실패: vm={vm_id}: {e}"),
            }

            let Some(pause) = pause_before(self.clock.now(), deadline, self.interval) else {
                break;
            };
            self.clock.sleep(pause).await;
        }

        Err(CoreError::PipelineTimeout {
            what: format!("VM {vm_id} 게스트 IP"),
            waited_secs: elapsed_secs(started, self.clock.now()),
        })
    }
}

/// 대기 한도 → 시계 간격
pub(crate) fn wait_budget(max_wait: Duration) -> Result<chrono::Duration, CoreError> {
    chrono::Duration::from_std(max_wait)
        .map_err(|e| CoreError::Config(format!("대기 한도가 너무 큽니다: {e}")))
}

/// 다음 폴링 전 대기 시간. 마감이 지났으면 `None`
///
/// 마감 직전에는 남은 시간만큼만 기다려 마지막 조회가 마감 시각에 일어나게 한다.
pub(crate) fn pause_before(
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
    interval: Duration,
) -> Option<Duration> {
    let remaining = (deadline - now).to_std().ok()?;
    if remaining.is_zero() {
        return None;
    }
    Some(interval.min(remaining))
}

pub(crate) fn elapsed_secs(started: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - started).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{t0, CallLog, FakeHypervisor, ManualClock};
    use assert_matches::assert_matches;

    fn resolver(clock: Arc<ManualClock>) -> IpResolver {
        IpResolver::new(clock, Duration::from_secs(2), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn ip_on_third_poll_sleeps_twice() {
        let clock = Arc::new(ManualClock::new(t0()));
        let hv = FakeHypervisor::new(CallLog::default());
        {
            let mut state = hv.state.lock();
            state.vms.insert(201, true);
            state.polls_until_ip = 2;
        }

        let ip = resolver(clock.clone()).resolve(&hv, "pve1", 201).await.unwrap();
        assert_eq!(ip, "10.0.0.15");
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 2]);
    }

    #[tokio::test]
    async fn never_running_times_out() {
        let clock = Arc::new(ManualClock::new(t0()));
        let log = CallLog::default();
        let hv = FakeHypervisor::new(log.clone());
        hv.state.lock().vms.insert(201, false);

        let err = resolver(clock.clone())
            .resolve(&hv, "pve1", 201)
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::PipelineTimeout { waited_secs: 10, .. });
        // 0, 2, 4, 6, 8, 10초에 조회
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 5]);
        let status_calls = log
            .lock()
            .iter()
            .filter(|c| c.starts_with("hv:get_vm_status"))
            .count();
        assert_eq!(status_calls, 6);
    }

    #[tokio::test]
    async fn agent_errors_are_swallowed() {
        let clock = Arc::new(ManualClock::new(t0()));
        let hv = FakeHypervisor::new(CallLog::default());
        hv.state.lock().vms.insert(201, true);
        hv.fail("get_vm_network_ip");

        let err = resolver(clock).resolve(&hv, "pve1", 201).await.unwrap_err();
        assert_matches!(err, CoreError::PipelineTimeout { .. });
    }

    #[tokio::test]
    async fn missing_vm_fails_fast() {
        let clock = Arc::new(ManualClock::new(t0()));
        let hv = FakeHypervisor::new(CallLog::default());

        let err = resolver(clock.clone())
            .resolve(&hv, "pve1", 404)
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::NotFound { .. });
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn slow_hypervisor_calls_count_toward_wait() {
        let clock = Arc::new(ManualClock::new(t0()));
        let hv = FakeHypervisor::new(CallLog::default())
            .with_latency(clock.clone(), chrono::Duration::seconds(30));
        hv.state.lock().vms.insert(201, false);

        let err = resolver(clock.clone())
            .resolve(&hv, "pve1", 201)
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::PipelineTimeout { waited_secs: 30, .. });
        assert!(clock.sleeps().is_empty());
        assert_eq!(clock.now() - t0(), chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn last_pause_is_clipped_to_deadline() {
        let clock = Arc::new(ManualClock::new(t0()));
        let hv = FakeHypervisor::new(CallLog::default())
            .with_latency(clock.clone(), chrono::Duration::seconds(2));
        hv.state.lock().vms.insert(201, false);

        let resolver = IpResolver::new(clock.clone(), Duration::from_secs(4), Duration::from_secs(10));
        let err = resolver.resolve(&hv, "pve1", 201).await.unwrap_err();
        // 조회는 0, 6, 10초에 시작. 마지막 대기는 남은 2초로 줄어든다
        assert_matches!(err, CoreError::PipelineTimeout { waited_secs: 12, .. });
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(4), Duration::from_secs(2)]
        );
    }
}
