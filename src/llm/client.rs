//! LLM 客户端

use futures::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;
use std::time::Duration;
use tracing::info;

use super::openai::stream_chat_completion;
use super::types::{ChatMessage, CompletionDelta, CompletionParams, LlmError};

/// OpenAI 兼容的聊天客户端
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    /// 创建新的 LLM 客户端
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(LlmError::ConfigError("API Key is required".to_string()));
        }
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(LlmError::ConfigError("base_url is required".to_string()));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(LlmError::HttpError)?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    /// 流式聊天
    pub fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        params: &CompletionParams,
    ) -> Pin<Box<dyn Stream<Item = Result<CompletionDelta, LlmError>> + Send>> {
        info!("LLM request: model={}, messages={}", params.model, messages.len());
        stream_chat_completion(&self.client, &self.api_key, &self.base_url, messages, params)
    }

    /// 流式请求并拼接完整文本（可能为空，由调用方判断）
    pub async fn complete(&self, messages: Vec<ChatMessage>, params: &CompletionParams) -> Result<String, LlmError> {
        let mut stream = self.stream_chat(messages, params);
        let mut content = String::new();
        let mut finish_reason = None;

        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if let Some(text) = delta.text {
                content.push_str(&text);
            }
            if delta.finish_reason.is_some() {
                finish_reason = delta.finish_reason;
            }
        }

        info!(
            "LLM response: {} chars, finish_reason={}",
            content.len(),
            finish_reason.as_deref().unwrap_or("none")
        );
        Ok(content)
    }
}
