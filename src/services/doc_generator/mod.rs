//! 文档生成
//!
//! - 生成请求与文本生成接口，LLM 实现
//! - Prompt 模板
//! - 按任务计划并发生成并写入断点

pub mod generator;
pub mod prompts;
pub mod runner;

pub use generator::{GenerationRequest, GeneratorError, LlmDocGenerator, ReferencedDoc, TextGenerator};
pub use runner::{DocRunner, RunSummary, RunnerEvent};
