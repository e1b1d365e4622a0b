//! 노드 부하 점수.
//!
//! 점수 = RAM 가중치 × 실효 RAM 사용률 + CPU 가중치 × 실효 CPU 사용률 (0..1).
//! 실효 사용률은 클러스터 오버커밋 비율로 나눈 값이다. 낮을수록 여유 있는 노드.
//!
//! 텔레메트리 조회는 노드당 TTL 동안 캐시한다.

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;
use vmlease_core::config::PlacementConfig;
use vmlease_core::error::CoreError;
use vmlease_core::models::cluster::{Cluster, NodeKey};
use vmlease_core::models::telemetry::NodeTelemetry;
use vmlease_core::ports::clock::Clock;
use vmlease_core::ports::hypervisor::HypervisorApi;

#[derive(Debug, Clone, Copy)]
struct CachedScore {
    score: f64,
    computed_at: DateTime<Utc>,
}

/// 노드 부하 점수 계산기
pub struct LoadScorer {
    ram_weight: f64,
    cpu_weight: f64,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    cache: Mutex<LruCache<NodeKey, CachedScore>>,
}

impl LoadScorer {
    /// 배치 설정으로 생성
    pub fn new(config: &PlacementConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.score_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ram_weight: config.ram_weight,
            cpu_weight: config.cpu_weight,
            ttl: chrono::Duration::seconds(config.score_cache_ttl_secs as i64),
            clock,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// 텔레메트리로 점수 계산 (캐시 미사용)
    pub fn compute(&self, telemetry: &NodeTelemetry, cluster: &Cluster) -> f64 {
        let ram = effective(telemetry.ram_fraction(), cluster.memory_overcommit_ratio);
        let cpu = effective(telemetry.cpu, cluster.cpu_overcommit_ratio);
        (self.ram_weight * ram + self.cpu_weight * cpu).clamp(0.0, 1.0)
    }

    /// 노드 점수 (TTL 캐시 경유)
    ///
    /// 텔레메트리 조회 실패는 그대로 반환한다. 호출자는 해당 노드를 후보에서 제외한다.
    pub async fn score(
        &self,
        api: &dyn HypervisorApi,
        cluster: &Cluster,
        node: &str,
    ) -> Result<f64, CoreError> {
        let key = NodeKey::new(cluster.id, node);
        let now = self.clock.now();

        if let Some(cached) = self.cache.lock().get(&key).copied() {
            if now - cached.computed_at < self.ttl {
                return Ok(cached.score);
            }
        }

        let telemetry = api.get_node_status(node).await?;
        let score = self.compute(&telemetry, cluster);
        debug!(
            "노드 점수 {key}: {score:.3} (cpu={:.2}, ram={:.2})",
            telemetry.cpu,
            telemetry.ram_fraction()
        );

        self.cache.lock().put(
            key,
            CachedScore {
                score,
                computed_at: now,
            },
        );
        Ok(score)
    }

    /// 캐시 항목 제거 (배치 직후 등 최신 값이 필요할 때)
    pub fn invalidate(&self, key: &NodeKey) {
        self.cache.lock().pop(key);
    }
}

fn effective(fraction: f64, overcommit: f64) -> f64 {
    if overcommit > 0.0 {
        fraction / overcommit
    } else {
        fraction
    }
}
