//! OpenAI 兼容 Chat Completions API 流式实现

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::{debug, error};

use super::types::{ChatMessage, CompletionDelta, CompletionParams, LlmError};

/// 请求载荷
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// SSE 响应块
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

/// 单行 SSE 数据的解析结果
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseLine {
    Delta(CompletionDelta),
    Done,
    Ignore,
}

/// 规范化 base_url 并补全 `/v1/chat/completions`
pub(crate) fn build_endpoint(base_url: &str) -> String {
    let mut url = base_url.trim_end_matches('/').to_string();
    if let Some(pos) = url.find("://") {
        let (scheme, rest) = url.split_at(pos + 3);
        url = format!("{}{}", scheme, rest.replace("//", "/"));
    }

    if url.ends_with("/chat/completions") {
        url
    } else if url.ends_with("/v1") {
        format!("{}/chat/completions", url)
    } else {
        format!("{}/v1/chat/completions", url)
    }
}

/// 从缓冲区取出一行完整数据（含换行符），按行解码以免拆开多字节字符
pub(crate) fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let newline_pos = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
    Some(String::from_utf8_lossy(&line).into_owned())
}

pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => match chunk.choices.into_iter().next() {
            Some(choice) => SseLine::Delta(CompletionDelta {
                text: choice.delta.content,
                finish_reason: choice.finish_reason,
            }),
            None => SseLine::Ignore,
        },
        Err(e) => {
            debug!("Failed to parse completion chunk: {}, data: {}", e, data);
            SseLine::Ignore
        }
    }
}

/// 发起流式请求
pub fn stream_chat_completion(
    client: &Client,
    api_key: &str,
    base_url: &str,
    messages: Vec<ChatMessage>,
    params: &CompletionParams,
) -> Pin<Box<dyn Stream<Item = Result<CompletionDelta, LlmError>> + Send>> {
    let endpoint = build_endpoint(base_url);
    let api_key = api_key.to_string();
    let params = params.clone();
    let client = client.clone();

    Box::pin(try_stream! {
        let payload = ChatRequest {
            model: &params.model,
            messages: &messages,
            stream: true,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        debug!("Chat completion request: endpoint={}, model={}", endpoint, params.model);
        let response = client
            .post(&endpoint)
            .bearer_auth(&api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = response.text().await.unwrap_or_default();
            let preview: String = error_text.chars().take(500).collect();
            error!("Chat completion error: status={}, body={}", status_code, preview);
            Err::<(), LlmError>(LlmError::ApiError {
                status: status_code,
                message: error_text,
            })?;
            return;
        }

        let mut buffer: Vec<u8> = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(bytes) = body.next().await {
            let bytes = bytes?;
            buffer.extend_from_slice(&bytes);

            while let Some(line) = take_line(&mut buffer) {
                match parse_sse_line(&line) {
                    SseLine::Delta(delta) => {
                        yield delta;
                    }
                    SseLine::Done => return,
                    SseLine::Ignore => {}
                }
            }
        }
    })
}
