//! 工具调用编排循环
//!
//! Requesting → Inspecting → (Executing → Requesting) | Done | LoopDetected | Exhausted。
//! 每次模型调用都经过 RetryScheduler；函数失败、重复调用、循环、轮数耗尽、空响应都转为文本结果，
//! 只有拒答与未分类 / 重试耗尽的传输错误以 Err 返回。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::OrchestratorSection;
use crate::conversation::Message;
use crate::core::{RelayError, RetryScheduler};
use crate::llm::{ModelClient, TokenUsage, Verbosity};
use crate::orchestrator::events::emit;
use crate::orchestrator::round::{RequestTemplate, RoundRunner, RoundVerdict};
use crate::orchestrator::{RoundEvent, RoundState};
use crate::tools::FunctionSandbox;

pub const LOOP_DETECTED_MESSAGE: &str =
    "I'm sorry, but I seem to be stuck repeating the same action. Please try rephrasing your request.";
pub const ROUNDS_EXHAUSTED_MESSAGE: &str =
    "I've reached the maximum number of processing rounds for this request. Please try rephrasing your question.";
pub const INVALID_RESPONSE_MESSAGE: &str = "Sorry, I received an invalid response from the model.";

/// 运行结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Done,
    LoopDetected,
    Exhausted,
    InvalidResponse,
}

/// run_detailed 的完整结果
#[derive(Debug, Clone)]
pub struct Outcome {
    pub text: String,
    pub termination: Termination,
    /// 模型调用次数
    pub rounds: usize,
    /// 运行结束时的输入序列
    pub messages: Vec<Message>,
    pub usage: TokenUsage,
}

/// 一次运行的输入
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub verbosity: Verbosity,
    /// 仅首轮生效
    pub force_tool_use: bool,
}

impl RunInput {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_force_tool_use(mut self, force: bool) -> Self {
        self.force_tool_use = force;
        self
    }
}

#[derive(Clone)]
pub struct ToolCallOrchestrator {
    client: Arc<dyn ModelClient>,
    sandbox: FunctionSandbox,
    scheduler: RetryScheduler,
    settings: OrchestratorSection,
    events: Option<UnboundedSender<RoundEvent>>,
}

impl ToolCallOrchestrator {
    pub fn new(client: Arc<dyn ModelClient>, sandbox: FunctionSandbox) -> Self {
        Self {
            client,
            sandbox,
            scheduler: RetryScheduler::default(),
            settings: OrchestratorSection::default(),
            events: None,
        }
    }

    pub fn with_retry(mut self, scheduler: RetryScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSection) -> Self {
        self.settings = settings.normalized();
        self
    }

    /// 过程事件发送端
    pub fn with_events(mut self, events: UnboundedSender<RoundEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn client(&self) -> &Arc<dyn ModelClient> {
        &self.client
    }

    pub fn sandbox(&self) -> &FunctionSandbox {
        &self.sandbox
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &OrchestratorSection {
        &self.settings
    }

    pub(crate) fn events(&self) -> Option<&UnboundedSender<RoundEvent>> {
        self.events.as_ref()
    }

    pub(crate) fn template(&self, system: Option<String>, verbosity: Verbosity) -> RequestTemplate {
        RequestTemplate {
            system,
            verbosity,
            functions: self.sandbox.registry().specs(),
        }
    }

    pub(crate) fn runner(&self) -> RoundRunner<'_> {
        RoundRunner {
            sandbox: &self.sandbox,
            max_parallel_calls: self.settings.max_parallel_calls,
            events: self.events.as_ref(),
        }
    }

    /// 只返回最终文本
    pub async fn run(&self, input: RunInput) -> Result<String, RelayError> {
        Ok(self.run_detailed(input).await?.text)
    }

    pub async fn run_detailed(&self, input: RunInput) -> Result<Outcome, RelayError> {
        let RunInput {
            system,
            messages,
            verbosity,
            force_tool_use,
        } = input;
        let template = self.template(system, verbosity);
        let runner = self.runner();
        let max_rounds = self.settings.max_rounds;
        let mut state = RoundState::new(messages, force_tool_use, &self.settings);

        loop {
            if state.round() >= max_rounds {
                tracing::warn!(rounds = state.round(), "maximum rounds reached");
                emit(self.events(), RoundEvent::RoundsExhausted { rounds: state.round() });
                let rounds = state.round();
                return Ok(self.finish(state, Termination::Exhausted, ROUNDS_EXHAUSTED_MESSAGE, rounds));
            }

            let round = state.round();
            emit(self.events(), RoundEvent::RoundStarted { round, max_rounds });
            tracing::info!(round, max_rounds, provider = self.client.provider(), "requesting model");

            let request = template.request(&state);
            let output = self
                .scheduler
                .execute(|| self.client.invoke(&request))
                .await?;
            state.add_usage(output.usage.as_ref());

            if output.calls.is_empty() {
                let Some(text) = output.text.filter(|t| !t.trim().is_empty()) else {
                    tracing::warn!(round, "model returned neither text nor function calls");
                    return Ok(self.finish(
                        state,
                        Termination::InvalidResponse,
                        INVALID_RESPONSE_MESSAGE,
                        round + 1,
                    ));
                };
                state.push(Message::assistant(text.clone()));
                return Ok(self.finish(state, Termination::Done, text, round + 1));
            }

            tracing::info!(round, calls = output.calls.len(), "executing function calls");
            let narrative = output.text.filter(|t| !t.trim().is_empty());
            if let RoundVerdict::LoopDetected { name } = runner.execute(&mut state, narrative, output.calls).await {
                emit(self.events(), RoundEvent::LoopDetected { round, name });
                let rounds = state.round();
                return Ok(self.finish(state, Termination::LoopDetected, LOOP_DETECTED_MESSAGE, rounds));
            }
        }
    }

    fn finish(
        &self,
        state: RoundState,
        termination: Termination,
        text: impl Into<String>,
        rounds: usize,
    ) -> Outcome {
        emit(self.events(), RoundEvent::Finished { rounds, termination });
        tracing::info!(rounds, ?termination, "orchestration finished");
        let usage = state.usage();
        Outcome {
            text: text.into(),
            termination,
            rounds,
            messages: state.into_input(),
            usage,
        }
    }
}
