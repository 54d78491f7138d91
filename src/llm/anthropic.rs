//! Anthropic Messages API 客户端（reqwest 直连）
//!
//! 非 2xx 响应连同 JSON 错误体、retry-after 头一起转为 ProviderError，由 RetryScheduler 分类。
//! 流式接口回放完整响应为增量序列（文本 → 各函数调用 → 段结束）。

use async_trait::async_trait;
use futures_util::stream;
use serde_json::Value;

use crate::conversation::anthropic as wire;
use crate::core::RelayError;
use crate::llm::{DeltaStream, ModelClient, ModelOutput, ModelRequest, ProviderError, StreamDelta};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl AnthropicClient {
    /// 未给出 api_key 时读取 ANTHROPIC_API_KEY；两者皆无则为配置错误
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Result<Self, RelayError> {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| RelayError::Config("missing Anthropic API key".to_string()))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url
                .filter(|u| !u.is_empty())
                .unwrap_or(ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

/// 把完整响应拆成增量事件
fn replay(output: ModelOutput) -> Vec<Result<StreamDelta, ProviderError>> {
    let mut deltas = Vec::with_capacity(output.calls.len() + 2);
    if let Some(text) = output.text {
        deltas.push(Ok(StreamDelta::Text(text)));
    }
    for (index, call) in output.calls.into_iter().enumerate() {
        deltas.push(Ok(StreamDelta::FunctionCall {
            index,
            id: Some(call.id),
            name: Some(call.name),
            arguments: call.arguments,
        }));
    }
    deltas.push(Ok(StreamDelta::SegmentEnd));
    deltas
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelOutput, ProviderError> {
        let body = wire::to_request_body(&self.model, request);
        let response = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(e.to_string()))?;

        if !response.status().is_success() {
            let err = ProviderError::from_response(response).await;
            tracing::debug!(error = %err, "anthropic request failed");
            return Err(err);
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::transport(format!("invalid messages payload: {e}")))?;
        wire::parse_response(&payload)
    }

    async fn invoke_stream(&self, request: &ModelRequest) -> Result<DeltaStream, ProviderError> {
        let output = self.invoke(request).await?;
        Ok(Box::pin(stream::iter(replay(output))))
    }

    fn provider(&self) -> &str {
        "anthropic"
    }
}
