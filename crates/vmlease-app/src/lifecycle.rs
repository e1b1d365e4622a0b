//! 라이프사이클 관리.
//!
//! 워커, 스케줄러 루프, 웹 서버가 같은 종료 채널을 구독한다.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 라이프사이클 관리자
pub struct LifecycleManager {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl LifecycleManager {
    /// 새 라이프사이클 관리자 생성
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            shutdown_tx: tx,
            shutdown_rx: rx,
            tasks: Vec::new(),
        }
    }

    /// 종료 수신기 복제
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// 백그라운드 작업 등록 (종료 시 완료를 기다림)
    pub fn track(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.push((name.into(), handle));
    }

    /// 등록된 작업 수
    pub fn tracked(&self) -> usize {
        self.tasks.len()
    }

    /// 종료 신호 발송
    pub fn shutdown(&self) {
        info!("종료 신호 발송");
        let _ = self.shutdown_tx.send(true);
    }

    /// OS 시그널 대기 (SIGINT, SIGTERM) 후 종료 신호 발송
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;

            tokio::select! {
                _ = sigint.recv() => {
                    info!("SIGINT 수신");
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM 수신");
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Ctrl+C 수신");
        }

        self.shutdown();
        Ok(())
    }

    /// 등록된 작업이 모두 끝날 때까지 대기
    pub async fn join_all(self) {
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!("작업 비정상 종료: {name}: {e}");
            }
        }
        info!("모든 백그라운드 작업 종료");
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
