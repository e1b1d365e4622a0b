//! 설정 파일 관리.
//!
//! JSON 설정 파일 위에 `VMLEASE__<섹션>__<키>` 환경변수를 덮어써서 로드한다.
//! 로드 직후 `AppConfig::validate()`를 통과해야 한다.

use crate::config::AppConfig;
use crate::error::CoreError;
use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// 설정 파일 이름
const CONFIG_FILE_NAME: &str = "config.json";

/// 환경변수 접두사
const ENV_PREFIX: &str = "VMLEASE";

/// 설정 관리자
///
/// 파일 + 환경변수 병합 로드와 런타임 재로드를 담당한다.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    /// 현재 설정 (스레드 안전)
    config: Arc<RwLock<AppConfig>>,
    /// 설정 파일 경로
    config_path: PathBuf,
}

impl ConfigManager {
    /// 플랫폼 기본 경로에서 설정 로드
    pub fn new() -> Result<Self, CoreError> {
        let config_path = Self::config_dir()?.join(CONFIG_FILE_NAME);
        Self::with_path(config_path)
    }

    /// 지정된 경로로 설정 관리자 생성
    ///
    /// 설정 파일이 없으면 기본 설정을 저장한 뒤 로드한다.
    pub fn with_path(config_path: PathBuf) -> Result<Self, CoreError> {
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    CoreError::Config(format!(
                        "설정 디렉토리 생성 실패: {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
                info!("설정 디렉토리 생성: {}", parent.display());
            }
        }

        if !config_path.exists() {
            Self::save_to_file(&config_path, &AppConfig::default_config())?;
            info!("기본 설정 파일 생성: {}", config_path.display());
        }

        let config = Self::load(&config_path)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// 현재 설정 반환 (복제본)
    pub fn get(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// 설정 파일 경로 반환
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 설정 다시 로드
    ///
    /// 검증에 실패하면 기존 설정을 유지한다.
    pub fn reload(&self) -> Result<(), CoreError> {
        let config = Self::load(&self.config_path)?;
        *self.config.write() = config;
        info!("설정 다시 로드 완료");
        Ok(())
    }

    /// 플랫폼별 설정 디렉토리 경로
    pub fn config_dir() -> Result<PathBuf, CoreError> {
        ProjectDirs::from("dev", "vmlease", "vmlease")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| CoreError::Config("홈 디렉토리를 찾을 수 없습니다".to_string()))
    }

    /// 데이터 디렉토리 경로 (SQLite DB)
    pub fn data_dir() -> Result<PathBuf, CoreError> {
        ProjectDirs::from("dev", "vmlease", "vmlease")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| CoreError::Config("홈 디렉토리를 찾을 수 없습니다".to_string()))
    }

    /// 파일 + 환경변수 병합 후 검증
    fn load(path: &Path) -> Result<AppConfig, CoreError> {
        let config: AppConfig = Config::builder()
            .add_source(File::from(path).format(FileFormat::Json).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                CoreError::Config(format!("설정 로드 실패: {}: {}", path.display(), e))
            })?;

        config.validate()?;
        debug!("설정 로드 완료: {}", path.display());
        Ok(config)
    }

    /// 파일에 설정 저장
    fn save_to_file(path: &Path, config: &AppConfig) -> Result<(), CoreError> {
        let content = serde_json::to_string_pretty(config)
            .map_err(|e| CoreError::Config(format!("설정 직렬화 실패: {}", e)))?;

        fs::write(path, content).map_err(|e| {
            CoreError::Config(format!("설정 파일 저장 실패: {}: {}", path.display(), e))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[test]
    fn creates_default_file_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        let manager = ConfigManager::with_path(config_path.clone()).unwrap();
        assert!(config_path.exists());
        assert_eq!(manager.get().provisioning.vmid_min, 200);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{ "quota": { "max_sessions": 5 }, "placement": { "overload_threshold": 0.9 } }"#,
        )
        .unwrap();

        let config = ConfigManager::with_path(config_path).unwrap().get();
        assert_eq!(config.quota.max_sessions, 5);
        assert_eq!(config.quota.max_minutes, 240);
        assert_eq!(config.placement.overload_threshold, 0.9);
        assert_eq!(config.placement.ram_weight, 0.7);
    }

    #[test]
    fn invalid_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{ "provisioning": { "vmid_min": 900, "vmid_max": 100 } }"#,
        )
        .unwrap();

        let result = ConfigManager::with_path(config_path);
        assert_matches!(result, Err(CoreError::Config(_)));
    }

    #[test]
    fn env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, r#"{ "worker": { "node_sync_secs": 120 } }"#).unwrap();

        std::env::set_var("VMLEASE__WORKER__NODE_SYNC_SECS", "45");
        let config = ConfigManager::with_path(config_path).unwrap().get();
        std::env::remove_var("VMLEASE__WORKER__NODE_SYNC_SECS");

        assert_eq!(config.worker.node_sync_secs, 45);
    }

    #[test]
    fn reload_picks_up_changes() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let manager = ConfigManager::with_path(config_path.clone()).unwrap();

        let mut config = manager.get();
        config.server.port = 7777;
        fs::write(&config_path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        manager.reload().unwrap();
        assert_eq!(manager.get().server.port, 7777);
    }

    #[test]
    fn failed_reload_keeps_current_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let manager = ConfigManager::with_path(config_path.clone()).unwrap();

        fs::write(&config_path, r#"{ "worker": { "concurrency": 0 } }"#).unwrap();
        assert!(manager.reload().is_err());
        assert_eq!(manager.get().worker.concurrency, 4);
    }
}
