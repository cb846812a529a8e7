//! Application configuration module / 应用配置模块
//!
//! Manages backend configuration loaded from config.json.
//! Creates default config file on first run / 首次运行时创建默认配置文件

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config path / 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "YAOLIST_STORAGE_CONFIG";

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging configuration / 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Backend instances / 存储后端实例
    #[serde(default)]
    pub backends: Vec<BackendEntry>,
}

/// Logging configuration / 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing EnvFilter directive, overridden by RUST_LOG / 日志过滤规则
    pub filter: String,
}

/// One configured backend / 单个后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    /// Backend id used by callers / 后端ID
    pub id: String,
    /// "s3" | "kodo" | "oss"
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Backend specific config, see each factory's items / 后端特有配置
    pub config: Value,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "yaolist_storage=debug".to_string(),
        }
    }
}

impl AppConfig {
    /// Find a backend entry by id / 按ID查找后端配置
    pub fn backend(&self, id: &str) -> Option<&BackendEntry> {
        self.backends.iter().find(|entry| entry.id == id)
    }
}

/// Get the config file path / 获取配置文件路径
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Parse configuration text / 解析配置内容
pub fn parse_config(content: &str) -> Result<AppConfig, String> {
    serde_json::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config(config_path: &Path) -> Result<AppConfig, String> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config = parse_config(&content)?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::default();
        save_config(config_path, &config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config_path: &Path, config: &AppConfig) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}
