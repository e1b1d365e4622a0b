//! 엔진 조립.
//!
//! 설정 하나와 어댑터 묶음으로 세션 서비스, 작업 런타임, 주기 작업을 구성한다.

use std::sync::Arc;
use vmlease_core::config::AppConfig;

use crate::cluster_selector::ClusterSelector;
use crate::context::EngineContext;
use crate::expiry::{ExpiryHandler, ExpirySweeper};
use crate::inventory::NodeInventorySync;
use crate::node_selector::NodeSelector;
use crate::provisioning::ProvisioningPipeline;
use crate::quota::QuotaGuard;
use crate::rate_limit::ViewerRateLimiter;
use crate::runtime::{TaskHandler, TaskHandlers, TaskRuntime};
use crate::scorer::LoadScorer;
use crate::session_service::SessionService;
use crate::termination::TerminationPipeline;
use crate::vmid::VmidAllocator;

/// 조립된 엔진
pub struct Engine {
    /// 세션 요청 진입점
    pub sessions: Arc<SessionService>,
    /// 작업 큐 워커 런타임
    pub runtime: Arc<TaskRuntime>,
    /// 만료 스윕
    pub sweeper: Arc<ExpirySweeper>,
    /// 노드 인벤토리 동기화
    pub inventory: Arc<NodeInventorySync>,
    /// 공유 어댑터
    pub ctx: EngineContext,
}

impl Engine {
    pub fn new(ctx: EngineContext, config: &AppConfig) -> Self {
        let scorer = Arc::new(LoadScorer::new(&config.placement, ctx.clock.clone()));
        let node_selector = Arc::new(NodeSelector::new(
            ctx.sessions.clone(),
            ctx.nodes.clone(),
            ctx.connector.clone(),
            scorer,
            config.placement.overload_threshold,
        ));
        let cluster_selector = Arc::new(ClusterSelector::new(
            ctx.clusters.clone(),
            ctx.nodes.clone(),
            node_selector,
        ));
        let quota = Arc::new(QuotaGuard::new(
            ctx.sessions.clone(),
            config.quota.clone(),
            ctx.clock.clone(),
        ));
        let limiter = ViewerRateLimiter::per_minute(
            config.gateway.viewer_rate_limit_per_minute,
            ctx.clock.clone(),
        );
        let sessions = Arc::new(SessionService::new(
            ctx.clone(),
            cluster_selector,
            quota,
            limiter,
            config.gateway.viewer_token_ttl_secs,
        ));

        let vmids = Arc::new(VmidAllocator::new(
            ctx.sessions.clone(),
            config.provisioning.vmid_min,
            config.provisioning.vmid_max,
        ));
        let provisioning: Arc<dyn TaskHandler> = Arc::new(ProvisioningPipeline::new(
            ctx.clone(),
            vmids,
            config.provisioning.clone(),
        ));
        let termination: Arc<dyn TaskHandler> =
            Arc::new(TerminationPipeline::new(ctx.clone(), &config.termination));
        let expiry: Arc<dyn TaskHandler> =
            Arc::new(ExpiryHandler::new(ctx.clone(), &config.termination));
        let runtime = Arc::new(TaskRuntime::new(
            ctx.queue.clone(),
            ctx.clock.clone(),
            TaskHandlers {
                provisioning,
                termination,
                expiry,
            },
            config.lease_duration(),
        ));

        let sweeper = Arc::new(ExpirySweeper::new(ctx.clone()));
        let inventory = Arc::new(NodeInventorySync::new(
            ctx.clusters.clone(),
            ctx.nodes.clone(),
            ctx.connector.clone(),
        ));

        Self {
            sessions,
            runtime,
            sweeper,
            inventory,
            ctx,
        }
    }
}
