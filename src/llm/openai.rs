//! OpenAI 兼容 API 客户端
//!
//! 请求体由 conversation::openai 生成并按 async_openai 的 CreateChatCompletionRequest 校验，
//! 经 reqwest 直连任意 OpenAI 兼容端点（OpenAI、DeepSeek、自建代理等）。
//! 不做任何内部重试：非 2xx 响应连同状态码、错误体、retry-after 头转为 ProviderError，交给 RetryScheduler。
//! 流式响应按 SSE 解析（eventsource-stream），首个事件即为错误时作为建立失败返回。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OPENAI_API_BASE;
use async_openai::types::chat::CreateChatCompletionRequest;
use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::{future, stream, StreamExt};
use serde_json::Value;

use crate::conversation::openai as wire;
use crate::core::RelayError;
use crate::llm::{DeltaStream, ModelClient, ModelOutput, ModelRequest, ProviderError, StreamDelta};

/// DeepSeek API 常量
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// Token 使用统计（进程内累计值）
#[derive(Debug, Clone, Default)]
pub struct UsageCounter {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl UsageCounter {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

/// OpenAI 兼容客户端：持有 HTTP 客户端、端点与 model 名
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    provider: &'static str,
    /// 累计 token 使用统计
    pub usage: UsageCounter,
}

impl OpenAiClient {
    /// 未给出 api_key 时读取 OPENAI_API_KEY；base_url 缺省为 OpenAI 官方端点
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Result<Self, RelayError> {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url
                .filter(|u| !u.is_empty())
                .unwrap_or(OPENAI_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.to_string(),
            provider: "openai",
            usage: UsageCounter::default(),
        })
    }

    /// DeepSeek 客户端：优先 DEEPSEEK_API_KEY，模型缺省为 deepseek-chat
    pub fn deepseek(model: Option<&str>, api_key: Option<&str>) -> Result<Self, RelayError> {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        let model = model.unwrap_or(DEEPSEEK_CHAT);
        let mut client = Self::new(Some(DEEPSEEK_BASE_URL), model, api_key.as_deref())?;
        client.provider = "deepseek";
        Ok(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 获取累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, request: &ModelRequest, stream: bool) -> Result<CreateChatCompletionRequest, ProviderError> {
        let body = wire::to_request_body(&self.model, request, stream);
        serde_json::from_value(body)
            .map_err(|e| ProviderError::new(format!("failed to build chat request: {e}")))
    }

    /// 单次 POST；非 2xx 直接转为 ProviderError
    async fn post(&self, body: &CreateChatCompletionRequest) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let err = ProviderError::from_response(response).await;
        tracing::debug!(provider = self.provider, error = %err, "chat completion request failed");
        Err(err)
    }
}

/// 单个 SSE 事件 → 增量事件；`{"error": ...}` 帧视为 Provider 错误
fn decode_event(event: Result<Event, EventStreamError<reqwest::Error>>) -> Vec<Result<StreamDelta, ProviderError>> {
    let event = match event {
        Ok(event) => event,
        Err(e) => return vec![Err(ProviderError::transport(e.to_string()))],
    };
    if event.data.trim().is_empty() {
        return Vec::new();
    }
    let decoded = serde_json::from_str::<Value>(&event.data)
        .map_err(|e| ProviderError::transport(format!("malformed stream event: {e}")))
        .and_then(|value| {
            if value.get("error").is_some() {
                return Err(ProviderError::from_body(None, value));
            }
            wire::parse_chunk(&value)
        });
    match decoded {
        Ok(deltas) => deltas.into_iter().map(Ok).collect(),
        Err(e) => vec![Err(e)],
    }
}

fn is_done(event: &Result<Event, EventStreamError<reqwest::Error>>) -> bool {
    matches!(event, Ok(e) if e.data.trim() == "[DONE]")
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelOutput, ProviderError> {
        let req = self.build_request(request, false)?;
        let response = self.post(&req).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::transport(format!("invalid chat completion payload: {e}")))?;
        let output = wire::parse_response(&payload)?;
        if let Some(usage) = &output.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(output)
    }

    async fn invoke_stream(&self, request: &ModelRequest) -> Result<DeltaStream, ProviderError> {
        let req = self.build_request(request, true)?;
        let response = self.post(&req).await?;

        let mut deltas = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| future::ready(!is_done(event)))
            .flat_map(|event| stream::iter(decode_event(event)))
            .boxed();

        // 部分兼容端点先回 200 再在首个事件里报错：按建立失败处理，交给重试调度分类
        match deltas.next().await {
            Some(Err(e)) => Err(e),
            first => Ok(Box::pin(stream::iter(first).chain(deltas))),
        }
    }

    fn provider(&self) -> &str {
        self.provider
    }
}
