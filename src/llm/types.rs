//! 与 Provider 无关的请求 / 响应 / 流式增量类型
//!
//! 适配层负责把各家原生结构解析为这些类型，编排层只接触归一化后的数据。

use std::fmt::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::Message;

/// 合成调用 id 的最大长度（与 OpenAI 限制一致）
const SYNTHETIC_CALL_ID_MAX_LEN: usize = 40;

/// 模型发起的一次函数调用；arguments 为未解析的序列化参数
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl FunctionCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// 生成合成调用 id：call_<uuid>，截断到 40 字符
pub fn synthetic_call_id() -> String {
    let mut id = String::new();
    let _ = write!(&mut id, "call_{}", uuid::Uuid::new_v4().simple());
    id.truncate(SYNTHETIC_CALL_ID_MAX_LEN);
    id
}

/// 函数声明（供模型选择调用）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema
    pub parameters: Value,
}

/// 工具选择策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    /// 强制模型调用工具（仅首轮生效）
    Required,
}

/// 输出详细程度 / 质量提示，由适配层映射到各自参数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Low,
    #[default]
    Medium,
    High,
}

/// 一次模型调用的完整请求
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub input: Vec<Message>,
    pub functions: Vec<FunctionSpec>,
    pub tool_choice: ToolChoice,
    pub verbosity: Verbosity,
}

/// Token 使用统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// 归一化后的模型输出：文本与函数调用均可缺省
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelOutput {
    pub text: Option<String>,
    pub calls: Vec<FunctionCall>,
    pub usage: Option<TokenUsage>,
}

impl ModelOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn calls(calls: Vec<FunctionCall>) -> Self {
        Self {
            calls,
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// 非空白的叙述文本
    pub fn narrative(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// 流式增量事件
#[derive(Clone, Debug, PartialEq)]
pub enum StreamDelta {
    /// 文本增量
    Text(String),
    /// 函数调用片段：同一 index 的片段跨 chunk 累积，id / name 通常只在首个片段出现
    FunctionCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// 本段结束
    SegmentEnd,
}

impl StreamDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}
