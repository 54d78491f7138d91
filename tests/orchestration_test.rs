//! 编排循环集成测试：脚本化模型 + 真实函数沙箱

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parley::config::OrchestratorSection;
use parley::conversation::{ConversationBuilder, Message, Role};
use parley::llm::{FunctionCall, ModelOutput, ProviderError, ScriptedModelClient};
use parley::orchestrator::{
    RunInput, Termination, ToolCallOrchestrator, LOOP_DETECTED_MESSAGE, ROUNDS_EXHAUSTED_MESSAGE,
};
use parley::tools::{FunctionRegistry, FunctionSandbox, TypedFunction};
use parley::RelayError;
use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Deserialize, JsonSchema)]
struct SumArgs {
    a: i64,
    b: i64,
}

fn counting_sum(counter: Arc<AtomicUsize>) -> FunctionSandbox {
    let registry = FunctionRegistry::new().with(TypedFunction::new(
        "sum",
        "Add two integers",
        move |args: SumArgs| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(args.a + args.b)
            }
        },
    ));
    FunctionSandbox::new(Arc::new(registry))
}

fn prompt(text: &str) -> RunInput {
    RunInput::new(ConversationBuilder::new().user_prompt(text).build())
}

fn sum_call(id: &str, args: &str) -> ModelOutput {
    ModelOutput::calls(vec![FunctionCall::new(id, "sum", args)])
}

#[tokio::test]
async fn test_text_only_reply_is_returned_verbatim() {
    let mock = Arc::new(ScriptedModelClient::new().respond(ModelOutput::text("  2+2 is 4.\n")));
    let orchestrator = ToolCallOrchestrator::new(mock.clone(), FunctionSandbox::default());

    let text = orchestrator.run(prompt("2+2?")).await.unwrap();

    assert_eq!(text, "  2+2 is 4.\n");
    assert_eq!(mock.call_count(), 1);
    assert!(mock.requests()[0].functions.is_empty());
}

#[tokio::test]
async fn test_single_call_executes_once_then_answers() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(
        ScriptedModelClient::new()
            .respond(sum_call("call_1", r#"{"a":2,"b":2}"#))
            .respond(ModelOutput::text("The sum is 4.")),
    );
    let orchestrator = ToolCallOrchestrator::new(mock.clone(), counting_sum(counter.clone()));

    let outcome = orchestrator.run_detailed(prompt("What is sum(2,2)?")).await.unwrap();

    assert!(outcome.text.contains('4'));
    assert_eq!(outcome.termination, Termination::Done);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(mock.call_count(), 2);

    let requests = mock.requests();
    assert_eq!(requests[0].functions.len(), 1);
    let second_input = &requests[1].input;
    let results: Vec<&Message> = second_input
        .iter()
        .filter(|m| m.role() == Role::FunctionResult)
        .collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].call_id(), Some("call_1"));
    assert_eq!(results[0].content(), Some("4"));
    assert!(!results[0].is_error());
}

#[tokio::test]
async fn test_round_cap_is_never_exceeded() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut mock = ScriptedModelClient::new();
    for i in 0..5 {
        mock = mock.respond(sum_call(&format!("call_{i}"), &format!(r#"{{"a":{i},"b":1}}"#)));
    }
    let mock = Arc::new(mock);
    let orchestrator = ToolCallOrchestrator::new(mock.clone(), counting_sum(counter.clone()))
        .with_settings(OrchestratorSection {
            max_rounds: 3,
            ..Default::default()
        });

    let outcome = orchestrator.run_detailed(prompt("keep adding")).await.unwrap();

    assert_eq!(outcome.text, ROUNDS_EXHAUSTED_MESSAGE);
    assert_eq!(outcome.termination, Termination::Exhausted);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(mock.call_count(), 3);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_repeated_identical_call_is_deduplicated_then_stopped() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(
        ScriptedModelClient::new()
            .respond(sum_call("call_1", r#"{"a":2,"b":2}"#))
            .respond(sum_call("call_2", r#"{"b":2,"a":2}"#))
            .respond(sum_call("call_3", r#"{"a":2,"b":2}"#))
            .respond(ModelOutput::text("never reached")),
    );
    let orchestrator = ToolCallOrchestrator::new(mock.clone(), counting_sum(counter.clone()));

    let outcome = orchestrator.run_detailed(prompt("sum forever")).await.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.text, LOOP_DETECTED_MESSAGE);
    assert_eq!(outcome.termination, Termination::LoopDetected);
    assert_eq!(mock.call_count(), 3);

    let results: Vec<&Message> = outcome
        .messages
        .iter()
        .filter(|m| m.role() == Role::FunctionResult)
        .collect();
    assert_eq!(results.len(), 3);
    assert!(!results[0].is_error());
    assert!(results[1].is_error() && results[2].is_error());
    assert!(results[2].content().unwrap_or_default().contains("Duplicate call"));
}

#[tokio::test]
async fn test_function_failures_keep_the_loop_going() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(
        ScriptedModelClient::new()
            .respond(ModelOutput::calls(vec![
                FunctionCall::new("call_1", "sum", "{not json"),
                FunctionCall::new("call_2", "divide", r#"{"a":1}"#),
                FunctionCall::new("call_3", "sum", r#"{"a":"two"}"#),
            ]))
            .respond(ModelOutput::text("I could not compute that.")),
    );
    let orchestrator = ToolCallOrchestrator::new(mock.clone(), counting_sum(counter.clone()));

    let outcome = orchestrator.run_detailed(prompt("try things")).await.unwrap();

    assert_eq!(outcome.text, "I could not compute that.");
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    let results: Vec<&Message> = outcome
        .messages
        .iter()
        .filter(|m| m.role() == Role::FunctionResult)
        .collect();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|m| m.is_error()));
    assert!(results[1].content().unwrap_or_default().contains("Function 'divide' not found"));
    assert!(results[2].content().unwrap_or_default().contains("validation/execution failed"));
}

#[tokio::test]
async fn test_identical_runs_produce_identical_text() {
    let script = || {
        Arc::new(
            ScriptedModelClient::new()
                .respond(sum_call("", r#"{"a":20,"b":22}"#))
                .respond(ModelOutput::text("It is 42.")),
        )
    };
    let first = ToolCallOrchestrator::new(script(), counting_sum(Arc::new(AtomicUsize::new(0))))
        .run(prompt("20+22"))
        .await
        .unwrap();
    let second = ToolCallOrchestrator::new(script(), counting_sum(Arc::new(AtomicUsize::new(0))))
        .run(prompt("20+22"))
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_is_retried_transparently() {
    let mock = Arc::new(
        ScriptedModelClient::new()
            .fail(ProviderError::http(429, "Too many requests"))
            .respond(ModelOutput::text("ok")),
    );
    let orchestrator = ToolCallOrchestrator::new(mock.clone(), FunctionSandbox::default());

    assert_eq!(orchestrator.run(prompt("hi")).await.unwrap(), "ok");
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn test_unclassified_error_crosses_the_boundary() {
    let mock = Arc::new(ScriptedModelClient::new().fail(ProviderError::http(404, "model not found")));
    let orchestrator = ToolCallOrchestrator::new(mock.clone(), FunctionSandbox::default());

    let err = orchestrator.run(prompt("hi")).await.unwrap_err();
    assert!(matches!(err, RelayError::Provider(_)));
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn test_skipped_call_runs_again_after_window_clears() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mock = Arc::new(
        ScriptedModelClient::new()
            .respond(sum_call("call_1", r#"{"a":1,"b":1}"#))
            .respond(sum_call("call_2", r#"{"a":2,"b":2}"#))
            .respond(sum_call("call_3", r#"{"a":1,"b":1}"#))
            .respond(sum_call("call_4", r#"{"b":1,"a":1}"#))
            .respond(ModelOutput::text("done")),
    );
    let orchestrator = ToolCallOrchestrator::new(mock.clone(), counting_sum(counter.clone()))
        .with_settings(OrchestratorSection {
            dedup_clear_interval: 3,
            ..Default::default()
        });

    let outcome = orchestrator.run_detailed(prompt("add again later")).await.unwrap();

    assert_eq!(outcome.text, "done");
    assert_eq!(outcome.termination, Termination::Done);
    assert_eq!(mock.call_count(), 5);
    assert_eq!(counter.load(Ordering::SeqCst), 3);

    let results: Vec<&Message> = outcome
        .messages
        .iter()
        .filter(|m| m.role() == Role::FunctionResult)
        .collect();
    assert_eq!(results.len(), 4);
    assert!(!results[0].is_error() && !results[1].is_error());
    assert!(results[2].content().unwrap_or_default().contains("Duplicate call"));
    assert!(!results[3].is_error());
    assert_eq!(results[3].content(), Some("2"));
}
