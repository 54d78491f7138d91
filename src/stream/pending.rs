//! 流式函数调用片段缓冲
//!
//! 同一调用的片段按 index 累积（id / name 通常只出现在首个片段），段结束时按 index 顺序定稿。

use std::collections::BTreeMap;

use crate::llm::{synthetic_call_id, FunctionCall};

#[derive(Debug, Clone, Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct PendingCalls {
    entries: BTreeMap<usize, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, index: usize, id: Option<String>, name: Option<String>, arguments: &str) {
        let entry = self.entries.entry(index).or_default();
        if entry.id.is_none() {
            entry.id = id.filter(|id| !id.trim().is_empty());
        }
        if entry.name.is_empty() {
            if let Some(name) = name {
                entry.name = name;
            }
        }
        entry.arguments.push_str(arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 取出全部调用：缺 id 的补合成 id，空参数视为 `{}`，没有函数名的片段丢弃
    pub fn finalize(&mut self) -> Vec<FunctionCall> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .filter_map(|(index, call)| {
                if call.name.trim().is_empty() {
                    tracing::warn!(index, "dropping streamed function call without a name");
                    return None;
                }
                let arguments = if call.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments
                };
                Some(FunctionCall::new(
                    call.id.unwrap_or_else(synthetic_call_id),
                    call.name,
                    arguments,
                ))
            })
            .collect()
    }
}
