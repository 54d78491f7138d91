//! Anthropic Messages API 原生结构转换
//!
//! system 为顶层字段；助手的函数调用是 tool_use 块；函数结果以 tool_result 块放在 user 消息中，
//! 连续的多个结果必须合并进同一条 user 消息。

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::conversation::{Message, Role};
use crate::llm::{
    FunctionCall, ModelOutput, ModelRequest, ProviderError, TokenUsage, ToolChoice, Verbosity,
};

/// Verbosity → max_tokens（Anthropic 必填）
pub fn max_tokens(verbosity: Verbosity) -> u32 {
    match verbosity {
        Verbosity::Low => 1024,
        Verbosity::Medium => 4096,
        Verbosity::High => 8192,
    }
}

/// 参数字符串 → tool_use.input；无法解析或非对象时用空对象
fn arguments_as_input(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(v @ Value::Object(_)) => v,
        _ => Value::Object(Map::new()),
    }
}

pub fn to_messages(input: &[Message]) -> Vec<Value> {
    let mut messages: Vec<Value> = Vec::with_capacity(input.len());
    let mut pending_results: Vec<Value> = Vec::new();

    for msg in input {
        if msg.role() == Role::FunctionResult {
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": msg.call_id().unwrap_or_default(),
                "content": msg.content().unwrap_or_default(),
            });
            if msg.is_error() {
                block["is_error"] = json!(true);
            }
            pending_results.push(block);
            continue;
        }
        if !pending_results.is_empty() {
            messages.push(json!({"role": "user", "content": std::mem::take(&mut pending_results)}));
        }
        match msg.role() {
            Role::User => {
                messages.push(json!({"role": "user", "content": msg.content().unwrap_or_default()}))
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                if let Some(text) = msg.content().filter(|t| !t.is_empty()) {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in msg.function_calls() {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": arguments_as_input(&call.arguments),
                    }));
                }
                messages.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::FunctionResult => {}
        }
    }
    if !pending_results.is_empty() {
        messages.push(json!({"role": "user", "content": pending_results}));
    }
    messages
}

pub fn to_request_body(model: &str, request: &ModelRequest) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens(request.verbosity),
        "messages": to_messages(&request.input),
    });
    if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
        body["system"] = json!(system);
    }
    if !request.functions.is_empty() {
        let tools: Vec<Value> = request
            .functions
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "description": f.description,
                    "input_schema": f.parameters,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
        body["tool_choice"] = match request.tool_choice {
            ToolChoice::Auto => json!({"type": "auto"}),
            ToolChoice::Required => json!({"type": "any"}),
        };
    }
    body
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub fn parse_response(body: &Value) -> Result<ModelOutput, ProviderError> {
    let resp = MessagesResponse::deserialize(body)
        .map_err(|e| ProviderError::transport(format!("malformed messages response: {e}")))?;

    let mut text = String::new();
    let mut calls = Vec::new();
    for block in resp.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = if input.is_null() {
                    "{}".to_string()
                } else {
                    input.to_string()
                };
                calls.push(FunctionCall::new(id, name, arguments));
            }
            ContentBlock::Other => {}
        }
    }

    if resp.stop_reason.as_deref() == Some("refusal") && calls.is_empty() {
        let message = if text.is_empty() {
            "model refused to respond".to_string()
        } else {
            text
        };
        return Err(ProviderError::refusal(message));
    }

    Ok(ModelOutput {
        text: (!text.is_empty()).then_some(text),
        calls,
        usage: resp.usage.map(|u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FunctionSpec;
    use crate::tools::FunctionResult;

    #[test]
    fn test_consecutive_results_merge_into_one_user_message() {
        let a = FunctionCall::new("toolu_1", "sum", r#"{"a":1,"b":2}"#);
        let b = FunctionCall::new("toolu_2", "lookup", "not json");
        let input = vec![
            Message::user("do both"),
            Message::assistant_with_calls(Some("working".into()), vec![a.clone(), b.clone()]),
            Message::function_result(&FunctionResult::success(&a, "3".into())),
            Message::function_result(&FunctionResult::failure(
                &b,
                crate::tools::FunctionErrorKind::NotFound,
                "Function 'lookup' not found",
            )),
        ];
        let msgs = to_messages(&input);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1]["content"][0]["type"], "text");
        assert_eq!(msgs[1]["content"][1]["input"]["b"], 2);
        assert_eq!(msgs[1]["content"][2]["input"], json!({}));
        let results = msgs[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["is_error"], true);
        assert!(results[0].get("is_error").is_none());
    }

    #[test]
    fn test_request_body_required_tool_choice() {
        let req = ModelRequest {
            system: Some("sys".into()),
            input: vec![Message::user("hi")],
            functions: vec![FunctionSpec {
                name: "sum".into(),
                description: "add".into(),
                parameters: json!({"type": "object"}),
            }],
            tool_choice: ToolChoice::Required,
            verbosity: Verbosity::Low,
        };
        let body = to_request_body("claude-sonnet", &req);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["tool_choice"]["type"], "any");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn test_parse_tool_use_response() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Let me add."},
                {"type": "tool_use", "id": "toolu_1", "name": "sum", "input": {"a": 2, "b": 2}},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        });
        let out = parse_response(&body).unwrap();
        assert_eq!(out.text.as_deref(), Some("Let me add."));
        assert_eq!(out.calls.len(), 1);
        let args: Value = serde_json::from_str(&out.calls[0].arguments).unwrap();
        assert_eq!(args, json!({"a": 2, "b": 2}));
        assert_eq!(out.usage.unwrap().total(), 19);
    }

    #[test]
    fn test_parse_refusal_stop_reason() {
        let body = json!({"content": [], "stop_reason": "refusal"});
        let err = parse_response(&body).unwrap_err();
        assert_eq!(err.effective_status(), Some(400));
    }
}
