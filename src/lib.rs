//! 仓库文档生成
//!
//! 扫描 Python 仓库构建对象树，解析对象间的引用关系，
//! 按依赖顺序调度 LLM 生成文档，并在断点目录中持久化进度。

pub mod config;
pub mod error;
pub mod llm;
pub mod services;
