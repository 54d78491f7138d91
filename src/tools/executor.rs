//! 函数执行沙箱
//!
//! 持有 FunctionRegistry，run(call) 依次完成：参数解析 → 按名查找 → 参数校验 → 执行，
//! 任一步失败都转为带错误标记的 FunctionResult，从不向调用方返回 Err 或传播 panic；
//! 每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::Value;

use crate::llm::FunctionCall;
use crate::tools::{FunctionErrorKind, FunctionRegistry, FunctionResult};

/// 函数执行沙箱
#[derive(Debug, Clone, Default)]
pub struct FunctionSandbox {
    registry: Arc<FunctionRegistry>,
}

impl FunctionSandbox {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// 执行一次函数调用；总是返回 FunctionResult
    pub async fn run(&self, call: &FunctionCall) -> FunctionResult {
        let start = Instant::now();
        let result = self.run_inner(call).await;

        let outcome = match result.error_kind() {
            None => "ok",
            Some(FunctionErrorKind::MalformedArguments) => "malformed_arguments",
            Some(FunctionErrorKind::NotFound) => "not_found",
            Some(FunctionErrorKind::ValidationFailed) => "validation_failed",
            Some(FunctionErrorKind::ExecutionFailed) => "execution_failed",
            Some(FunctionErrorKind::Duplicate) => "duplicate",
        };
        let audit = serde_json::json!({
            "event": "function_audit",
            "function": call.name,
            "call_id": call.id,
            "ok": !result.is_error,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "function");

        result
    }

    async fn run_inner(&self, call: &FunctionCall) -> FunctionResult {
        let raw = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        let args: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                return FunctionResult::failure(
                    call,
                    FunctionErrorKind::MalformedArguments,
                    format!("Invalid JSON arguments for function '{}': {}", call.name, e),
                )
            }
        };

        let Some(function) = self.registry.get(&call.name) else {
            return FunctionResult::failure(
                call,
                FunctionErrorKind::NotFound,
                format!("Function '{}' not found", call.name),
            );
        };

        let validated = match std::panic::catch_unwind(AssertUnwindSafe(|| function.validate_args(args))) {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                return FunctionResult::failure(
                    call,
                    FunctionErrorKind::ValidationFailed,
                    failed_message(&call.name, &format!("{e:#}")),
                )
            }
            Err(panic) => {
                return FunctionResult::failure(
                    call,
                    FunctionErrorKind::ValidationFailed,
                    failed_message(&call.name, &panic_message(panic.as_ref())),
                )
            }
        };

        match AssertUnwindSafe(function.execute(validated)).catch_unwind().await {
            Ok(Ok(value)) => FunctionResult::success(call, render_output(value)),
            Ok(Err(e)) => FunctionResult::failure(
                call,
                FunctionErrorKind::ExecutionFailed,
                failed_message(&call.name, &format!("{e:#}")),
            ),
            Err(panic) => FunctionResult::failure(
                call,
                FunctionErrorKind::ExecutionFailed,
                failed_message(&call.name, &panic_message(panic.as_ref())),
            ),
        }
    }
}

fn failed_message(name: &str, detail: &str) -> String {
    format!("Function '{name}' validation/execution failed: {detail}")
}

/// 字符串输出原样返回，其余值序列化为 JSON
fn render_output(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

fn args_preview(args: &str) -> String {
    if args.chars().count() > 200 {
        format!("{}...", args.chars().take(200).collect::<String>())
    } else {
        args.to_string()
    }
}
