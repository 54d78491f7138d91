//! 单轮函数执行（编排循环与流式续写共用）
//!
//! 先顺序规划去重（同轮内重复签名也算重复），再在信号量限制下并发执行非重复调用，
//! 结果按调用出现顺序追加到输入序列，最后做循环检测并推进轮次。

use std::collections::HashSet;

use futures_util::future::join_all;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;

use crate::conversation::Message;
use crate::llm::{synthetic_call_id, FunctionCall, FunctionSpec, ModelRequest, ToolChoice, Verbosity};
use crate::orchestrator::events::{emit, preview};
use crate::orchestrator::{CallSignature, RoundEvent, RoundState};
use crate::tools::{FunctionErrorKind, FunctionResult, FunctionSandbox};

/// 一轮执行后的走向
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RoundVerdict {
    Continue,
    LoopDetected { name: String },
}

/// 每轮请求中不变的部分
#[derive(Debug, Clone)]
pub(crate) struct RequestTemplate {
    pub system: Option<String>,
    pub verbosity: Verbosity,
    pub functions: Vec<FunctionSpec>,
}

impl RequestTemplate {
    /// 强制调用只在仍有待用标记且确有函数时生效
    pub fn request(&self, state: &RoundState) -> ModelRequest {
        let tool_choice = if state.force_tool_use() && !self.functions.is_empty() {
            ToolChoice::Required
        } else {
            ToolChoice::Auto
        };
        ModelRequest {
            system: self.system.clone(),
            input: state.input().to_vec(),
            functions: self.functions.clone(),
            tool_choice,
            verbosity: self.verbosity,
        }
    }
}

/// 空 id 或与本轮已有 id 冲突时换成合成 id
pub(crate) fn assign_call_ids(calls: Vec<FunctionCall>) -> Vec<FunctionCall> {
    let mut seen = HashSet::with_capacity(calls.len());
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
                call.id = synthetic_call_id();
                seen.insert(call.id.clone());
            }
            call
        })
        .collect()
}

pub(crate) fn duplicate_result(call: &FunctionCall) -> FunctionResult {
    FunctionResult::failure(
        call,
        FunctionErrorKind::Duplicate,
        format!(
            "Duplicate call to '{}' with identical arguments was skipped; use the earlier result.",
            call.name
        ),
    )
}

pub(crate) struct RoundRunner<'a> {
    pub sandbox: &'a FunctionSandbox,
    pub max_parallel_calls: usize,
    pub events: Option<&'a UnboundedSender<RoundEvent>>,
}

impl RoundRunner<'_> {
    pub async fn execute(
        &self,
        state: &mut RoundState,
        narrative: Option<String>,
        calls: Vec<FunctionCall>,
    ) -> RoundVerdict {
        let round = state.round();
        let calls = assign_call_ids(calls);
        state.push(Message::assistant_with_calls(narrative, calls.clone()));

        let mut signatures = Vec::with_capacity(calls.len());
        let mut duplicates = Vec::with_capacity(calls.len());
        for call in &calls {
            let signature = CallSignature::of(call);
            let duplicate = state.was_executed(&signature);
            if duplicate {
                tracing::warn!(round, function = %call.name, "skipping duplicate function call");
                emit(
                    self.events,
                    RoundEvent::DuplicateSkipped {
                        round,
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                    },
                );
            } else {
                state.record_executed(signature.clone());
                emit(
                    self.events,
                    RoundEvent::FunctionCall {
                        round,
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                );
            }
            signatures.push(signature);
            duplicates.push(duplicate);
        }

        let semaphore = Semaphore::new(self.max_parallel_calls.max(1));
        let results = join_all(calls.iter().zip(duplicates).map(|(call, duplicate)| {
            let semaphore = &semaphore;
            async move {
                if duplicate {
                    return duplicate_result(call);
                }
                let _permit = semaphore.acquire().await.ok();
                self.sandbox.run(call).await
            }
        }))
        .await;

        for result in results {
            emit(
                self.events,
                RoundEvent::FunctionResult {
                    round,
                    call_id: result.call_id.clone(),
                    name: result.name.clone(),
                    is_error: result.is_error,
                    preview: preview(&result.output),
                },
            );
            state.push(Message::function_result(&result));
        }

        let looping = state.observe_round(&signatures);
        state.advance();
        if looping {
            let name = calls.first().map(|c| c.name.clone()).unwrap_or_default();
            tracing::warn!(round, function = %name, "same call repeated, stopping");
            RoundVerdict::LoopDetected { name }
        } else {
            RoundVerdict::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorSection;
    use crate::conversation::Role;
    use crate::tools::{FunctionRegistry, TypedFunction};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Deserialize, JsonSchema)]
    struct SleepArgs {
        ms: u64,
    }

    fn sleeper(counter: Arc<AtomicUsize>) -> FunctionSandbox {
        let registry = FunctionRegistry::new().with(TypedFunction::new(
            "sleep",
            "Sleep then echo",
            move |args: SleepArgs| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(args.ms)).await;
                    Ok(format!("slept {}", args.ms))
                }
            },
        ));
        FunctionSandbox::new(Arc::new(registry))
    }

    #[test]
    fn test_assign_call_ids_replaces_empty_and_colliding() {
        let calls = vec![
            FunctionCall::new("", "a", "{}"),
            FunctionCall::new("dup", "b", "{}"),
            FunctionCall::new("dup", "c", "{}"),
        ];
        let fixed = assign_call_ids(calls);
        assert!(fixed[0].id.starts_with("call_"));
        assert_eq!(fixed[1].id, "dup");
        assert_ne!(fixed[2].id, "dup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_call_order_and_duplicates_skip() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sandbox = sleeper(counter.clone());
        let runner = RoundRunner {
            sandbox: &sandbox,
            max_parallel_calls: 4,
            events: None,
        };
        let mut state = RoundState::new(vec![Message::user("go")], false, &OrchestratorSection::default());
        let calls = vec![
            FunctionCall::new("c1", "sleep", r#"{"ms":300}"#),
            FunctionCall::new("c2", "sleep", r#"{"ms":10}"#),
            FunctionCall::new("c3", "sleep", r#"{"ms": 300}"#),
        ];
        let verdict = runner.execute(&mut state, None, calls).await;
        assert_eq!(verdict, RoundVerdict::Continue);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        let results: Vec<_> = state
            .input()
            .iter()
            .filter(|m| m.role() == Role::FunctionResult)
            .collect();
        let ids: Vec<_> = results.iter().map(|m| m.call_id().unwrap()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(results[0].content(), Some("slept 300"));
        assert!(results[2].is_error());
        assert_eq!(state.round(), 1);
    }
}
