//! 仓库文档生成命令行入口
//!
//! 读取配置，扫描目标仓库并按依赖顺序生成文档

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use doc_scheduler::config::load_config;
use doc_scheduler::llm::LlmClient;
use doc_scheduler::services::doc_generator::{DocRunner, LlmDocGenerator};

/// 在 Windows 上设置控制台代码页为 UTF-8
#[cfg(windows)]
fn setup_console_encoding() {
    unsafe {
        extern "system" {
            fn SetConsoleOutputCP(code_page: u32) -> i32;
        }
        SetConsoleOutputCP(65001);
    }
}

#[cfg(not(windows))]
fn setup_console_encoding() {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_console_encoding();

    let config = load_config().context("failed to load config")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("doc_scheduler={}", config.project.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting doc generation for {}",
        config.project.target_repo.display()
    );

    let chat = &config.chat_completion;
    let client = LlmClient::new(chat.api_key.clone(), chat.base_url.clone(), chat.timeout())
        .context("failed to create LLM client")?;
    let generator = LlmDocGenerator::new(
        client,
        chat.model.clone(),
        chat.temperature,
        config.project.language.clone(),
        config.project.max_document_tokens,
    );

    let mut runner = DocRunner::new(config, Arc::new(generator))?;
    let summary = runner.run().await?;

    info!(
        "Done: {} tasks, {} generated, {} failed",
        summary.total, summary.generated, summary.failed
    );
    Ok(())
}
