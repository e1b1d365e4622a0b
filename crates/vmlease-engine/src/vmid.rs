//! VMID 할당.
//!
//! 클러스터 안에서 범위 [min, max]에 기록된 최대 VMID + 1을 사용한다.
//! 종료된 세션의 VMID도 기록에 남으므로 재사용하지 않는다.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use vmlease_core::error::CoreError;
use vmlease_core::models::cluster::ClusterId;
use vmlease_core::models::session::Session;
use vmlease_core::ports::repository::SessionRepository;

/// VMID 할당기
pub struct VmidAllocator {
    sessions: Arc<dyn SessionRepository>,
    min: u32,
    max: u32,
    /// 조회와 기록 사이에 다른 워커가 같은 번호를 가져가지 않도록 직렬화
    assign_lock: Mutex<()>,
}

impl VmidAllocator {
    /// 새 할당기 생성
    pub fn new(sessions: Arc<dyn SessionRepository>, min: u32, max: u32) -> Self {
        Self {
            sessions,
            min,
            max,
            assign_lock: Mutex::new(()),
        }
    }

    /// 세션에 새 VMID를 할당하고 즉시 기록
    pub async fn assign(&self, session: &mut Session, now: DateTime<Utc>) -> Result<u32, CoreError> {
        let _guard = self.assign_lock.lock().await;
        let vm_id = self.allocate(session.cluster_id).await?;
        session.vm_id = Some(vm_id);
        session.updated_at = now;
        self.sessions.save(session).await?;
        Ok(vm_id)
    }

    /// 다음 VMID
    ///
    /// 범위가 소진되면 재시도해도 소용없는 `VmidExhausted`를 반환한다.
    pub async fn allocate(&self, cluster_id: ClusterId) -> Result<u32, CoreError> {
        let highest = self
            .sessions
            .max_vm_id_in_range(cluster_id, self.min, self.max)
            .await?;

        let next = match highest {
            None => self.min,
            Some(id) if id >= self.max => {
                return Err(CoreError::VmidExhausted {
                    min: self.min,
                    max: self.max,
                })
            }
            Some(id) => id + 1,
        };

        debug!("VMID 할당: cluster={cluster_id}, vmid={next}");
        Ok(next)
    }
}
