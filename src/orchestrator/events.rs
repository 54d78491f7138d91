//! 编排过程事件：可序列化为 JSON，供调用方展示进度

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::orchestrator::Termination;

/// 单轮过程事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    /// 第几轮开始（从 0 计）
    RoundStarted { round: usize, max_rounds: usize },
    FunctionCall {
        round: usize,
        call_id: String,
        name: String,
        arguments: String,
    },
    /// 函数返回（预览，避免过长）
    FunctionResult {
        round: usize,
        call_id: String,
        name: String,
        is_error: bool,
        preview: String,
    },
    /// 重复调用被跳过
    DuplicateSkipped {
        round: usize,
        call_id: String,
        name: String,
    },
    LoopDetected { round: usize, name: String },
    RoundsExhausted { rounds: usize },
    Finished {
        rounds: usize,
        termination: Termination,
    },
}

/// 接收端已关闭时静默丢弃
pub(crate) fn emit(sink: Option<&UnboundedSender<RoundEvent>>, event: RoundEvent) {
    if let Some(tx) = sink {
        let _ = tx.send(event);
    }
}

pub(crate) fn preview(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() > MAX {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    } else {
        text.to_string()
    }
}
