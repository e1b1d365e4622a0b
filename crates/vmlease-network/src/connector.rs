//! 클러스터별 하이퍼바이저 클라이언트 캐시.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vmlease_core::error::CoreError;
use vmlease_core::models::cluster::{Cluster, ClusterId};
use vmlease_core::ports::hypervisor::{HypervisorApi, HypervisorConnector};

use crate::proxmox_client::ProxmoxClient;
use crate::retry::RetryPolicy;

/// `HypervisorConnector` 구현
///
/// 접속 정보가 바뀌지 않는 한 클러스터당 클라이언트 하나를 재사용한다.
pub struct ProxmoxConnector {
    timeout: Duration,
    retry: RetryPolicy,
    clients: Mutex<HashMap<ClusterId, (String, Arc<dyn HypervisorApi>)>>,
}

impl ProxmoxConnector {
    /// 새 커넥터 생성
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            timeout,
            retry,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// 캐시 무효화 판단용 접속 지문
    fn fingerprint(cluster: &Cluster) -> String {
        format!(
            "{}|{}|{}",
            cluster.api_base_url(),
            cluster.credentials.token_id,
            cluster.credentials.verify_tls
        )
    }

    /// 캐시된 클라이언트 수
    pub fn cached(&self) -> usize {
        self.clients.lock().len()
    }
}

impl HypervisorConnector for ProxmoxConnector {
    fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn HypervisorApi>, CoreError> {
        let fingerprint = Self::fingerprint(cluster);
        let mut clients = self.clients.lock();

        if let Some((cached, client)) = clients.get(&cluster.id) {
            if *cached == fingerprint {
                return Ok(Arc::clone(client));
            }
        }

        debug!("하이퍼바이저 클라이언트 생성: cluster={}", cluster.name);
        let client: Arc<dyn HypervisorApi> = Arc::new(
            ProxmoxClient::new(&cluster.api_base_url(), &cluster.credentials, self.timeout)?
                .with_retry_policy(self.retry),
        );
        clients.insert(cluster.id, (fingerprint, Arc::clone(&client)));
        Ok(client)
    }
}
