//! OpenAI Chat Completions 原生结构转换
//!
//! 输入序列 → messages / tools JSON；响应与流式 chunk → ModelOutput / StreamDelta。
//! 兼容端点（DeepSeek 等）字段常有缺省或变体，解析时一律宽松处理。

use serde::Deserialize;
use serde_json::{json, Value};

use crate::conversation::{Message, Role};
use crate::llm::{
    FunctionCall, FunctionSpec, ModelOutput, ModelRequest, ProviderError, StreamDelta, TokenUsage,
    ToolChoice, Verbosity,
};

/// Verbosity → max_completion_tokens
pub fn max_completion_tokens(verbosity: Verbosity) -> u32 {
    match verbosity {
        Verbosity::Low => 1024,
        Verbosity::Medium => 4096,
        Verbosity::High => 16384,
    }
}

/// system + 输入序列 → messages 数组
pub fn to_messages(system: Option<&str>, input: &[Message]) -> Vec<Value> {
    let mut messages = Vec::with_capacity(input.len() + 1);
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        messages.push(json!({"role": "system", "content": system}));
    }
    for msg in input {
        let value = match msg.role() {
            Role::User => json!({"role": "user", "content": msg.content().unwrap_or_default()}),
            Role::Assistant => {
                let mut m = json!({"role": "assistant", "content": msg.content()});
                if !msg.function_calls().is_empty() {
                    let calls: Vec<Value> = msg
                        .function_calls()
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {"name": c.name, "arguments": c.arguments},
                            })
                        })
                        .collect();
                    m["tool_calls"] = Value::Array(calls);
                }
                m
            }
            Role::FunctionResult => json!({
                "role": "tool",
                "tool_call_id": msg.call_id().unwrap_or_default(),
                "content": msg.content().unwrap_or_default(),
            }),
        };
        messages.push(value);
    }
    messages
}

pub fn to_tools(functions: &[FunctionSpec]) -> Vec<Value> {
    functions
        .iter()
        .map(|f| {
            json!({
                "type": "function",
                "function": {
                    "name": f.name,
                    "description": f.description,
                    "parameters": f.parameters,
                },
            })
        })
        .collect()
}

/// 完整请求体
pub fn to_request_body(model: &str, request: &ModelRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": model,
        "messages": to_messages(request.system.as_deref(), &request.input),
        "max_completion_tokens": max_completion_tokens(request.verbosity),
    });
    if !request.functions.is_empty() {
        body["tools"] = Value::Array(to_tools(&request.functions));
        body["tool_choice"] = match request.tool_choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Required => json!("required"),
        };
    }
    if stream {
        body["stream"] = json!(true);
    }
    body
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: AssistantBody,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AssistantBody {
    content: Option<ContentField>,
    refusal: Option<String>,
    tool_calls: Option<Vec<ToolCallBody>>,
}

/// content 可能是字符串，也可能是 parts 数组
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentField {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl ContentField {
    fn into_text(self) -> String {
        match self {
            Self::Text(t) => t,
            Self::Parts(parts) => parts
                .into_iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text),
                    ContentPart::Other => None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    id: Option<String>,
    function: Option<FunctionBody>,
}

#[derive(Debug, Deserialize)]
struct FunctionBody {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<UsageBody> for TokenUsage {
    fn from(u: UsageBody) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }
    }
}

/// 非流式响应 → ModelOutput；拒答转为可分类的 ProviderError
pub fn parse_response(body: &Value) -> Result<ModelOutput, ProviderError> {
    let resp = ChatResponse::deserialize(body)
        .map_err(|e| ProviderError::transport(format!("malformed chat response: {e}")))?;
    let usage = resp.usage.map(TokenUsage::from);
    let Some(choice) = resp.choices.into_iter().next() else {
        return Ok(ModelOutput {
            usage,
            ..ModelOutput::default()
        });
    };
    let message = choice.message;
    let text = message.content.map(ContentField::into_text);
    let calls: Vec<FunctionCall> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter(|c| c.kind.as_deref().map_or(true, |k| k == "function"))
        .filter_map(|c| {
            let f = c.function?;
            Some(FunctionCall::new(
                c.id.unwrap_or_default(),
                f.name.unwrap_or_default(),
                f.arguments.unwrap_or_default(),
            ))
        })
        .collect();

    let has_text = text.as_deref().is_some_and(|t| !t.trim().is_empty());
    if !has_text && calls.is_empty() {
        if let Some(refusal) = message.refusal {
            return Err(ProviderError::refusal(refusal));
        }
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProviderError::http(400, "response blocked by content filter")
                .with_code("content_filter"));
        }
    }
    Ok(ModelOutput { text, calls, usage })
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    refusal: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<FunctionBody>,
}

/// 流式 chunk → 增量事件（可能为空，如仅含 usage 的尾 chunk）
pub fn parse_chunk(body: &Value) -> Result<Vec<StreamDelta>, ProviderError> {
    let chunk = ChatChunk::deserialize(body)
        .map_err(|e| ProviderError::transport(format!("malformed stream chunk: {e}")))?;
    let mut deltas = Vec::new();
    for choice in chunk.choices {
        if let Some(delta) = choice.delta {
            if let Some(refusal) = delta.refusal.filter(|r| !r.is_empty()) {
                return Err(ProviderError::refusal(refusal));
            }
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                deltas.push(StreamDelta::Text(content));
            }
            for (pos, call) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
                let (name, arguments) = match call.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                deltas.push(StreamDelta::FunctionCall {
                    index: call.index.unwrap_or(pos),
                    id: call.id,
                    name,
                    arguments,
                });
            }
        }
        match choice.finish_reason.as_deref() {
            Some("content_filter") => {
                return Err(ProviderError::http(400, "stream blocked by content filter")
                    .with_code("content_filter"));
            }
            Some(_) => deltas.push(StreamDelta::SegmentEnd),
            None => {}
        }
    }
    Ok(deltas)
}
