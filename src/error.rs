//! 统一错误处理模块
//!
//! 汇总各模块的错误类型

use thiserror::Error;

use crate::config::ConfigError;
use crate::llm::LlmError;
use crate::services::code_analyzer::ScanError;
use crate::services::doc_generator::GeneratorError;
use crate::services::doc_meta::CheckpointError;

/// 应用错误枚举
#[derive(Error, Debug)]
pub enum AppError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 仓库扫描错误
    #[error("扫描错误: {0}")]
    Scan(#[from] ScanError),

    /// 断点读写错误
    #[error("断点错误: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// 文档生成错误
    #[error("生成错误: {0}")]
    Generator(#[from] GeneratorError),

    /// LLM 调用错误
    #[error("LLM 错误: {0}")]
    Llm(#[from] LlmError),
}

/// 便捷类型别名
pub type AppResult<T> = Result<T, AppError>;
