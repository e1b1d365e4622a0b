//! # vmlease-app
//!
//! VMLEASE 세션 브로커 바이너리 진입점.
//! 설정 로드, 어댑터 DI, 작업 워커, 주기 루프, REST 서버, 종료 처리를 담당한다.

mod lifecycle;
mod notifier;
mod scheduler;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vmlease_core::config::AppConfig;
use vmlease_core::config_manager::ConfigManager;
use vmlease_core::ports::clock::SystemClock;
use vmlease_core::ports::notifier::OperatorNotifier;
use vmlease_engine::context::EngineContext;
use vmlease_engine::Engine;
use vmlease_network::auth::TokenManager;
use vmlease_network::connector::ProxmoxConnector;
use vmlease_network::guacamole_client::GuacamoleClient;
use vmlease_network::retry::RetryPolicy;
use vmlease_network::webhook_notifier::WebhookNotifier;
use vmlease_storage::sqlite::SqliteStorage;
use vmlease_web::WebServer;

use crate::lifecycle::LifecycleManager;
use crate::notifier::LogNotifier;
use crate::scheduler::{Scheduler, SchedulerConfig};

/// VMLEASE 세션 브로커
///
/// 하이퍼바이저 클러스터 위 시간 제한 VM 세션 배치/프로비저닝/회수
#[derive(Parser, Debug)]
#[command(name = "vmlease")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉토리의 config.json)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// SQLite DB 경로 (설정보다 우선)
    #[arg(long)]
    db: Option<PathBuf>,

    /// REST API 포트 (설정보다 우선)
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// 작업 워커 수 (설정보다 우선)
    #[arg(long, short = 'w')]
    workers: Option<usize>,

    /// REST API 서버 없이 워커/스케줄러만 실행
    #[arg(long)]
    no_web: bool,
}

/// 설정 로드 (파일 + 환경변수) 후 CLI 인자 반영
fn load_config(args: &Args) -> Result<AppConfig> {
    let manager = match &args.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    }
    .context("설정 로드 실패")?;
    info!("설정 파일: {}", manager.config_path().display());

    let mut config = manager.get();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db) = &args.db {
        config.database.path = Some(db.clone());
    }
    if let Some(workers) = args.workers {
        config.worker.concurrency = workers;
    }
    if args.no_web {
        config.server.enabled = false;
    }
    config.validate().context("설정 검증 실패")?;
    Ok(config)
}

/// 데이터베이스 경로 결정 (설정 또는 플랫폼 기본 경로)
///
/// - macOS: `~/Library/Application Support/dev.vmlease.vmlease/vmlease.db`
/// - Linux: `~/.local/share/vmlease/vmlease.db`
fn resolve_db_path(config: &AppConfig) -> PathBuf {
    config
        .database
        .path
        .clone()
        .or_else(|| {
            ConfigManager::data_dir()
                .ok()
                .map(|dir| dir.join("vmlease.db"))
        })
        .unwrap_or_else(|| PathBuf::from("./vmlease.db"))
}

fn operator_notifier(config: &AppConfig) -> Result<Arc<dyn OperatorNotifier>> {
    match &config.notifier.webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(
                url,
                config.request_timeout(),
                RetryPolicy::from_config(&config.http_retry),
            )?;
            info!("운영자 웹훅: {url}");
            Ok(Arc::new(LogNotifier::forwarding_to(Arc::new(webhook))))
        }
        None => Ok(Arc::new(LogNotifier::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_filter = format!(
        "vmlease={},vmlease_app={},vmlease_core={},vmlease_engine={},vmlease_storage={},vmlease_network={},vmlease_web={},tower_http={}",
        args.log_level,
        args.log_level,
        args.log_level,
        args.log_level,
        args.log_level,
        args.log_level,
        args.log_level,
        args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();

    info!("VMLEASE 세션 브로커 시작 (v{})", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;

    // ── 어댑터 생성 (DI 와이어링) ──

    // 1. 저장소
    let db_path = resolve_db_path(&config);
    let storage = Arc::new(SqliteStorage::open(&db_path)?);
    info!("SQLite 저장소: {}", db_path.display());

    // 2. 하이퍼바이저 (클러스터별 클라이언트)
    let retry = RetryPolicy::from_config(&config.http_retry);
    let connector = Arc::new(ProxmoxConnector::new(
        config.request_timeout(),
        retry,
    ));

    // 3. 원격 데스크톱 게이트웨이
    if config.gateway.username.is_empty() {
        warn!("게이트웨이 서비스 계정이 설정되지 않았습니다 (gateway.username)");
    }
    let tokens = Arc::new(TokenManager::new(
        &config.gateway.base_url,
        &config.gateway.username,
        &config.gateway.password,
    ));
    let gateway = Arc::new(
        GuacamoleClient::new(
            &config.gateway.base_url,
            config.viewer_base_url(),
            tokens,
            config.request_timeout(),
        )?
        .with_retry_policy(retry),
    );

    // 4. 운영자 알림
    let notifier = operator_notifier(&config)?;

    // 5. 엔진
    let ctx = EngineContext {
        sessions: storage.clone(),
        clusters: storage.clone(),
        nodes: storage.clone(),
        templates: storage.clone(),
        queue: storage.clone(),
        connector,
        gateway,
        notifier,
        clock: Arc::new(SystemClock),
    };
    let engine = Arc::new(Engine::new(ctx, &config));

    // ── 백그라운드 작업 ──
    let mut lifecycle = LifecycleManager::new();

    // 시작 직후 한 번 동기화 (실패해도 주기 루프가 다시 시도)
    match engine.inventory.sync_all().await {
        Ok(count) => info!("노드 인벤토리 초기 동기화: {count}개 갱신"),
        Err(e) => warn!("노드 인벤토리 초기 동기화 실패: {e}"),
    }

    let idle_poll = Duration::from_millis(config.worker.idle_poll_ms);
    for i in 0..config.worker.concurrency {
        let worker_id = format!("worker-{i}");
        let handle = tokio::spawn(engine.runtime.clone().run_worker(
            worker_id.clone(),
            idle_poll,
            lifecycle.subscribe(),
        ));
        lifecycle.track(worker_id, handle);
    }
    info!("작업 워커 {}개 시작", config.worker.concurrency);

    let scheduler = Scheduler::new(
        SchedulerConfig::from_worker(&config.worker),
        engine.clone(),
    );
    for (name, handle) in scheduler.spawn(lifecycle.subscribe()) {
        lifecycle.track(name, handle);
    }

    if config.server.enabled {
        let server = WebServer::new(engine.sessions.clone(), config.server.clone());
        let shutdown_rx = lifecycle.subscribe();
        lifecycle.track(
            "web",
            tokio::spawn(async move {
                if let Err(e) = server.run(shutdown_rx).await {
                    error!("REST API 서버 에러: {e}");
                }
            }),
        );
    } else {
        info!("REST API 서버 비활성화 (--no-web)");
    }

    lifecycle
        .wait_for_signal()
        .await
        .context("시그널 핸들러 등록 실패")?;
    lifecycle.join_all().await;

    info!("VMLEASE 세션 브로커 종료");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::parse_from([
            "vmlease",
            "--config",
            dir.path().join("config.json").to_str().unwrap(),
            "--port",
            "9191",
            "--workers",
            "2",
            "--db",
            "/tmp/vmlease-test.db",
            "--no-web",
        ]);

        let config = load_config(&args).unwrap();
        assert_eq!(config.server.port, 9191);
        assert_eq!(config.worker.concurrency, 2);
        assert!(!config.server.enabled);
        assert_eq!(
            resolve_db_path(&config),
            PathBuf::from("/tmp/vmlease-test.db")
        );
    }

    #[test]
    fn zero_workers_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::parse_from([
            "vmlease",
            "--config",
            dir.path().join("config.json").to_str().unwrap(),
            "--workers",
            "0",
        ]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn log_notifier_without_webhook() {
        use vmlease_core::models::session::SessionId;
        use vmlease_core::ports::notifier::{AlertKind, OperatorAlert};

        let notifier = operator_notifier(&AppConfig::default_config()).unwrap();
        let alert = OperatorAlert {
            kind: AlertKind::ProvisioningFailed,
            session_id: SessionId::new(),
            message: "클론 실패".to_string(),
            occurred_at: chrono::Utc::now(),
        };
        tokio_test::block_on(notifier.notify(&alert)).unwrap();
    }
}
