//! 函数执行结果信封
//!
//! 无论成功失败都产出 FunctionResult；失败以数据形式记录（错误类别 + 消息），不以 Err 传播，编排循环得以继续。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::llm::FunctionCall;

/// 在本地吸收的函数失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionErrorKind {
    /// 参数不是合法 JSON
    MalformedArguments,
    /// 没有同名函数
    NotFound,
    /// 参数校验失败
    ValidationFailed,
    /// 执行时报错或 panic
    ExecutionFailed,
    /// 同一签名在去重窗口内已执行过
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionError {
    pub kind: FunctionErrorKind,
    pub message: String,
}

/// 单次调用的结果：output 为序列化后的输出（失败时为错误描述 JSON）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub call_id: String,
    pub name: String,
    pub output: String,
    pub is_error: bool,
    pub error: Option<FunctionError>,
}

impl FunctionResult {
    pub fn success(call: &FunctionCall, output: String) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            is_error: false,
            error: None,
        }
    }

    /// 失败结果：output 带函数名与时间戳，供模型下一轮理解
    pub fn failure(call: &FunctionCall, kind: FunctionErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let output = json!({
            "error": message,
            "kind": kind,
            "function": call.name,
            "timestamp": Utc::now().to_rfc3339(),
        })
        .to_string();
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            is_error: true,
            error: Some(FunctionError { kind, message }),
        }
    }

    pub fn error_kind(&self) -> Option<FunctionErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_output_is_tagged() {
        let call = FunctionCall::new("call_1", "sum", "{oops");
        let result = FunctionResult::failure(&call, FunctionErrorKind::MalformedArguments, "bad json");
        assert!(result.is_error);
        assert_eq!(result.call_id, "call_1");
        let out: serde_json::Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(out["function"], "sum");
        assert_eq!(out["kind"], "malformed_arguments");
        assert!(out["timestamp"].as_str().is_some());
    }
}
