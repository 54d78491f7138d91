//! 单次编排运行的可变状态
//!
//! RoundState 由一次运行独占：输入序列、轮次、强制调用标记、已执行签名窗口、循环检测计数。
//! 清空签名窗口是显式的状态转移（advance 中按间隔触发），可独立测试。

use std::collections::VecDeque;
use std::fmt;

use serde_json::{Map, Value};

use crate::config::OrchestratorSection;
use crate::conversation::Message;
use crate::llm::{FunctionCall, TokenUsage};

/// 调用签名：函数名 + 规范化参数
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSignature(String);

impl CallSignature {
    pub fn of(call: &FunctionCall) -> Self {
        Self(format!("{}\u{0}{}", call.name, canonical_arguments(&call.arguments)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.replace('\u{0}', " "))
    }
}

/// 能解析为 JSON 的参数按键排序后重新序列化；否则取去首尾空白的原文
fn canonical_arguments(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "{}".to_string();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => sort_keys(value).to_string(),
        Err(_) => trimmed.to_string(),
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// 有界的已执行签名集合（按插入顺序淘汰最旧者）
#[derive(Debug, Clone)]
pub struct SignatureWindow {
    capacity: usize,
    entries: VecDeque<CallSignature>,
}

impl SignatureWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn contains(&self, signature: &CallSignature) -> bool {
        self.entries.contains(signature)
    }

    pub fn record(&mut self, signature: CallSignature) {
        if self.contains(&signature) {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(signature);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 一次运行的状态
#[derive(Debug, Clone)]
pub struct RoundState {
    input: Vec<Message>,
    round: usize,
    force_tool_use: bool,
    executed: SignatureWindow,
    last_single: Option<CallSignature>,
    consecutive_repeats: usize,
    usage: TokenUsage,
    dedup_clear_interval: usize,
    loop_repeat_limit: usize,
}

impl RoundState {
    pub fn new(input: Vec<Message>, force_tool_use: bool, settings: &OrchestratorSection) -> Self {
        Self {
            input,
            round: 0,
            force_tool_use,
            executed: SignatureWindow::new(settings.signature_window),
            last_single: None,
            consecutive_repeats: 0,
            usage: TokenUsage::default(),
            dedup_clear_interval: settings.dedup_clear_interval,
            loop_repeat_limit: settings.loop_repeat_limit.max(1),
        }
    }

    pub fn input(&self) -> &[Message] {
        &self.input
    }

    pub fn into_input(self) -> Vec<Message> {
        self.input
    }

    pub fn push(&mut self, message: Message) {
        self.input.push(message);
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn force_tool_use(&self) -> bool {
        self.force_tool_use
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn add_usage(&mut self, usage: Option<&TokenUsage>) {
        if let Some(u) = usage {
            self.usage.add(u);
        }
    }

    pub fn was_executed(&self, signature: &CallSignature) -> bool {
        self.executed.contains(signature)
    }

    pub fn record_executed(&mut self, signature: CallSignature) {
        self.executed.record(signature);
    }

    pub fn executed(&self) -> &SignatureWindow {
        &self.executed
    }

    /// 记录本轮的调用签名；返回是否达到循环判定阈值
    pub fn observe_round(&mut self, signatures: &[CallSignature]) -> bool {
        match signatures {
            [single] => {
                if self.last_single.as_ref() == Some(single) {
                    self.consecutive_repeats += 1;
                } else {
                    self.last_single = Some(single.clone());
                    self.consecutive_repeats = 0;
                }
            }
            _ => {
                self.last_single = None;
                self.consecutive_repeats = 0;
            }
        }
        self.consecutive_repeats >= self.loop_repeat_limit
    }

    /// 一轮结束：取消强制调用，轮次加一，按间隔清空签名窗口
    pub fn advance(&mut self) {
        self.force_tool_use = false;
        self.round += 1;
        if self.dedup_clear_interval > 0 && self.round % self.dedup_clear_interval == 0 {
            tracing::debug!(round = self.round, "clearing executed call signatures");
            self.executed.clear();
        }
    }
}
