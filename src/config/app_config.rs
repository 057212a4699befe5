//! 应用配置管理
//!
//! 从 JSON 文件加载配置，缺省字段使用默认值；配置值显式传给各组件

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "DOC_SCHEDULER_CONFIG";
/// 覆盖 API 密钥的环境变量
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// 获取配置文件路径
fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    // 配置文件位于可执行文件同级目录
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.json")
}

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("读取配置文件失败 ({0}): {1}")]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("解析配置文件失败 ({0}): {1}")]
    ParseError(PathBuf, #[source] serde_json::Error),
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub project: ProjectSettings,
    #[serde(default)]
    pub chat_completion: ChatCompletionSettings,
}

/// 目标仓库与生成过程设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// 目标仓库根目录
    #[serde(default = "default_target_repo")]
    pub target_repo: PathBuf,

    /// 断点目录名（位于目标仓库下）
    #[serde(default = "default_hierarchy_name")]
    pub hierarchy_name: String,

    /// 不生成文档的路径前缀
    #[serde(default)]
    pub ignore_list: Vec<String>,

    /// 文档语言
    #[serde(default = "default_language")]
    pub language: String,

    /// 最大并发任务数
    #[serde(default = "default_max_thread_count")]
    pub max_thread_count: usize,

    /// 单篇文档的 token 上限
    #[serde(default = "default_max_document_tokens")]
    pub max_document_tokens: u32,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// 写入 meta-info.json 的版本标签，缺省时使用生成完成的时间戳
    #[serde(default)]
    pub document_version: Option<String>,
}

fn default_target_repo() -> PathBuf {
    PathBuf::from(".")
}

fn default_hierarchy_name() -> String {
    ".project_doc_record".to_string()
}

fn default_language() -> String {
    "English".to_string()
}

fn default_max_thread_count() -> usize {
    4
}

fn default_max_document_tokens() -> u32 {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            target_repo: default_target_repo(),
            hierarchy_name: default_hierarchy_name(),
            ignore_list: Vec::new(),
            language: default_language(),
            max_thread_count: default_max_thread_count(),
            max_document_tokens: default_max_document_tokens(),
            log_level: default_log_level(),
            document_version: None,
        }
    }
}

impl ProjectSettings {
    /// 断点目录
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.target_repo.join(&self.hierarchy_name)
    }

    /// 实际使用的并发数（1..=16）
    pub fn thread_count(&self) -> usize {
        self.max_thread_count.clamp(1, 16)
    }
}

/// 模型调用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionSettings {
    #[serde(default = "default_model")]
    pub model: String,

    /// 温度参数 (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// 请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f64 {
    0.2
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for ChatCompletionSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            request_timeout: default_request_timeout(),
            base_url: String::new(),
            api_key: String::new(),
        }
    }
}

impl ChatCompletionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

/// 从指定文件加载配置，文件不存在时使用默认配置
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        debug!("Config file does not exist: {}", path.display());
        return Ok(AppConfig::default());
    }
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
    if content.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    let config = serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))?;
    info!("Config loaded: {}", path.display());
    Ok(config)
}

/// 加载配置并应用环境变量覆盖
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    if let Ok(api_key) = std::env::var(API_KEY_ENV) {
        if !api_key.is_empty() {
            config.chat_completion.api_key = api_key;
        }
    }
    Ok(config)
}
