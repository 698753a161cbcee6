use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::logging::LoggingConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub collect: CollectConfig,
    pub task: TaskConfig,
    pub rewrite: RewriteConfig,
    pub document: DocumentConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    pub enable_wal: bool,
}

/// Platform endpoints and fetch behavior for feed collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectConfig {
    pub feed_api_url: String,
    pub account_url_prefix: String,
    pub request_timeout_seconds: u64,
    /// Per-account collection budget; a slow account is abandoned past this
    pub collect_timeout_seconds: u64,
    pub max_feed_pages: usize,
    pub min_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Parallel account workers for a batch run
    pub workers: usize,
    pub max_retained_logs: usize,
    pub returned_logs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_seconds: u64,
    pub workers: usize,
    /// Articles shorter than this many characters are dropped instead of rewritten
    pub min_chars: usize,
    pub save_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub save_path: PathBuf,
    pub image_timeout_seconds: u64,
    pub image_referer: String,
    /// Fraction of image height cropped from the bottom to drop watermarks
    pub watermark_crop_percent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: get_data_directory().join("feedforge.db"),
            busy_timeout_ms: 30_000,
            enable_wal: true,
        }
    }
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            feed_api_url: "https://www.toutiao.com/api/pc/list/feed".to_string(),
            account_url_prefix: "https://www.toutiao.com/c/user/token/".to_string(),
            request_timeout_seconds: 30,
            collect_timeout_seconds: 60,
            max_feed_pages: 10,
            min_delay_ms: 1000,
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_retained_logs: 500,
            returned_logs: 100,
        }
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: String::new(),
            temperature: 0.95,
            request_timeout_seconds: 120,
            max_retries: 3,
            retry_delay_seconds: 5,
            workers: 10,
            min_chars: 1000,
            save_path: get_data_directory().join("rewritten"),
        }
    }
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            save_path: get_data_directory().join("articles"),
            image_timeout_seconds: 15,
            image_referer: "https://www.toutiao.com/".to_string(),
            watermark_crop_percent: 8,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, creating it on first run
    pub async fn load() -> Result<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            info!("No configuration file found, using defaults");
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub async fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = toml::from_str(&content)?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to the default location
    pub async fn save(&self) -> Result<()> {
        let config_path = get_config_path();

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(&config_path, content).await?;

        info!("Configuration saved to: {}", config_path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.task.workers == 0 {
            return Err(anyhow::anyhow!("task workers must be > 0"));
        }

        if self.task.returned_logs > self.task.max_retained_logs {
            return Err(anyhow::anyhow!(
                "returned_logs must not exceed max_retained_logs"
            ));
        }

        if self.collect.collect_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("collect timeout must be > 0"));
        }

        if self.collect.max_feed_pages == 0 {
            return Err(anyhow::anyhow!("max_feed_pages must be > 0"));
        }

        if !(0.0..=2.0).contains(&self.rewrite.temperature) {
            return Err(anyhow::anyhow!(
                "rewrite temperature must be between 0.0 and 2.0"
            ));
        }

        if self.rewrite.workers == 0 {
            return Err(anyhow::anyhow!("rewrite workers must be > 0"));
        }

        if self.document.watermark_crop_percent >= 100 {
            return Err(anyhow::anyhow!("watermark_crop_percent must be < 100"));
        }

        if self.api.port == 0 {
            return Err(anyhow::anyhow!("api port must be > 0"));
        }

        Ok(())
    }

    /// Ensure all output directories exist
    pub async fn ensure_directories(&self) -> Result<()> {
        let mut dirs = vec![
            self.document.save_path.clone(),
            self.rewrite.save_path.clone(),
        ];
        if let Some(parent) = self.database.path.parent() {
            dirs.push(parent.to_path_buf());
        }

        for dir in dirs {
            if !dir.exists() {
                tokio::fs::create_dir_all(&dir).await?;
                info!("Created directory: {}", dir.display());
            }
        }

        Ok(())
    }
}

/// Get the default data directory
fn get_data_directory() -> PathBuf {
    directories::ProjectDirs::from("io", "feedforge", "feedforge")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("data"))
}

/// Get the configuration file path
fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("io", "feedforge", "feedforge")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default().join("config.toml"))
}

/// Environment-based configuration overrides
pub struct ConfigOverrides;

impl ConfigOverrides {
    /// Apply environment variable overrides to configuration
    pub fn apply(config: &mut AppConfig) {
        if let Ok(db_path) = std::env::var("FF_DB_PATH") {
            config.database.path = PathBuf::from(db_path);
        }

        if let Ok(workers) = std::env::var("FF_TASK_WORKERS") {
            if let Ok(workers) = workers.parse::<usize>() {
                config.task.workers = workers;
            }
        }

        if let Ok(timeout) = std::env::var("FF_COLLECT_TIMEOUT") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                config.collect.collect_timeout_seconds = timeout;
            }
        }

        if let Ok(api_base) = std::env::var("FF_REWRITE_API_BASE") {
            config.rewrite.api_base = api_base;
        }

        if let Ok(api_key) = std::env::var("FF_REWRITE_API_KEY") {
            config.rewrite.api_key = api_key;
        }

        if let Ok(model) = std::env::var("FF_REWRITE_MODEL") {
            config.rewrite.model = model;
        }

        if let Ok(host) = std::env::var("FF_API_HOST") {
            config.api.host = host;
        }

        if let Ok(port) = std::env::var("FF_API_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.api.port = port;
            }
        }

        if let Ok(level) = std::env::var("FF_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.task.workers, 5);
        assert_eq!(config.rewrite.workers, 10);
        assert_eq!(config.collect.collect_timeout_seconds, 60);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.task.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_log_cap_inversion() {
        let mut config = AppConfig::default();
        config.task.returned_logs = config.task.max_retained_logs + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = AppConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.task.workers, config.task.workers);
        assert_eq!(parsed.collect.feed_api_url, config.collect.feed_api_url);
    }
}
