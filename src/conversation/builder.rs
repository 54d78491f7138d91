//! 输入序列组装
//!
//! 历史消息 + 新一轮用户输入 → 与 Provider 无关的有序输入序列；组装时清理会被 Provider 拒绝的历史片段。

use std::collections::HashSet;

use crate::conversation::{Message, Role};

/// 输入序列构建器
#[derive(Debug, Clone, Default)]
pub struct ConversationBuilder {
    history: Vec<Message>,
    prompt: Option<String>,
}

impl ConversationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加历史消息（保持原有顺序）
    pub fn history(mut self, history: &[Message]) -> Self {
        self.history.extend_from_slice(history);
        self
    }

    /// 设置本轮用户输入
    pub fn user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// 构建输入序列：丢弃空消息，以及找不到对应助手调用的函数结果
    pub fn build(self) -> Vec<Message> {
        let mut known_calls: HashSet<String> = HashSet::new();
        let mut input = Vec::with_capacity(self.history.len() + 1);
        for msg in self.history {
            match msg.role() {
                Role::FunctionResult => {
                    let matched = msg.call_id().is_some_and(|id| known_calls.contains(id));
                    if !matched {
                        tracing::debug!(id = msg.id(), "dropping orphan function result");
                        continue;
                    }
                }
                _ if msg.is_empty() => {
                    tracing::debug!(id = msg.id(), "dropping empty message");
                    continue;
                }
                Role::Assistant => {
                    known_calls.extend(msg.function_calls().iter().map(|c| c.id.clone()));
                }
                Role::User => {}
            }
            input.push(msg);
        }
        if let Some(prompt) = self.prompt {
            input.push(Message::user(prompt));
        }
        input
    }
}
