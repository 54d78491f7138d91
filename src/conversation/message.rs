//! 对话消息
//!
//! 消息一经创建不可修改（字段私有，只读访问）；对话历史是只追加的有序序列。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::FunctionCall;
use crate::tools::FunctionResult;

/// 消息角色：用户、助手、函数执行结果（system 指令不进入历史，由请求单独携带）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    FunctionResult,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    id: String,
    role: Role,
    content: Option<String>,
    /// 助手消息中模型发起的函数调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    function_calls: Vec<FunctionCall>,
    /// 函数结果消息对应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    call_id: Option<String>,
    /// 函数结果消息对应的函数名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    is_error: bool,
    timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            function_calls: Vec::new(),
            call_id: None,
            name: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Some(content.into()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(content.into()))
    }

    /// 带函数调用的助手消息；content 为空串时视为无文本
    pub fn assistant_with_calls(content: Option<String>, calls: Vec<FunctionCall>) -> Self {
        let content = content.filter(|c| !c.is_empty());
        let mut msg = Self::new(Role::Assistant, content);
        msg.function_calls = calls;
        msg
    }

    pub fn function_result(result: &FunctionResult) -> Self {
        let mut msg = Self::new(Role::FunctionResult, Some(result.output.clone()));
        msg.call_id = Some(result.call_id.clone());
        msg.name = Some(result.name.clone());
        msg.is_error = result.is_error;
        msg
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn function_calls(&self) -> &[FunctionCall] {
        &self.function_calls
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// 无文本且无函数调用
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().map_or(true, |c| c.trim().is_empty()) && self.function_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_with_calls_drops_empty_text() {
        let call = FunctionCall::new("call_1", "sum", r#"{"a":1}"#);
        let msg = Message::assistant_with_calls(Some(String::new()), vec![call]);
        assert_eq!(msg.role(), Role::Assistant);
        assert!(msg.content().is_none());
        assert_eq!(msg.function_calls().len(), 1);
        assert!(!msg.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_serde_roundtrip_keeps_role() {
        let msg = Message::user("2+2?");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.content(), Some("2+2?"));
        assert_eq!(back.id(), msg.id());
    }
}
