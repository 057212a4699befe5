//! LLM 模块
//!
//! OpenAI 兼容的 Chat Completions 流式客户端，文档生成器通过它请求模型

mod client;
mod openai;
mod types;

pub use client::LlmClient;
pub use types::*;
