//! 流式输出协调
//!
//! 逐段消费 Provider 增量事件，只向外产出叙述文本：文本经 StreamAccumulator 过滤掉混入的载荷，
//! 函数调用片段进入 PendingCalls；段结束时若有调用则静默执行一轮（与非流式路径同一套执行语义），
//! 再打开新一段续写，否则结束。段内传输错误只产出一条致歉文本后结束，不透出原始错误。

use std::pin::Pin;

use async_stream::stream;
use futures_util::{Stream, StreamExt};

use crate::config::StreamSection;
use crate::core::RelayError;
use crate::llm::StreamDelta;
use crate::orchestrator::events::emit;
use crate::orchestrator::round::RoundVerdict;
use crate::orchestrator::{
    RoundEvent, RoundState, RunInput, Termination, ToolCallOrchestrator, INVALID_RESPONSE_MESSAGE,
    LOOP_DETECTED_MESSAGE, ROUNDS_EXHAUSTED_MESSAGE,
};
use crate::stream::{PendingCalls, StreamAccumulator};

pub const STREAM_APOLOGY: &str = "Sorry, an error occurred while generating the response.";

/// 叙述文本增量流；一次性消费，不可重放
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, RelayError>> + Send>>;

#[derive(Clone)]
pub struct StreamReconciler {
    orchestrator: ToolCallOrchestrator,
    settings: StreamSection,
}

impl StreamReconciler {
    pub fn new(orchestrator: ToolCallOrchestrator) -> Self {
        Self {
            orchestrator,
            settings: StreamSection::default(),
        }
    }

    pub fn with_settings(mut self, settings: StreamSection) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &StreamSection {
        &self.settings
    }

    pub fn stream(&self, input: RunInput) -> TextStream {
        let this = self.clone();
        Box::pin(stream! {
            let RunInput { system, messages, verbosity, force_tool_use } = input;
            let orchestrator = &this.orchestrator;
            let events = orchestrator.events();
            let template = orchestrator.template(system, verbosity);
            let runner = orchestrator.runner();
            let max_rounds = orchestrator.settings().max_rounds;
            let mut state = RoundState::new(messages, force_tool_use, orchestrator.settings());
            let mut acc = StreamAccumulator::new(&this.settings);

            loop {
                if state.round() >= max_rounds {
                    tracing::warn!(rounds = state.round(), "maximum rounds reached while streaming");
                    emit(events, RoundEvent::RoundsExhausted { rounds: state.round() });
                    emit(events, RoundEvent::Finished { rounds: state.round(), termination: Termination::Exhausted });
                    acc.terminate();
                    yield Ok(ROUNDS_EXHAUSTED_MESSAGE.to_string());
                    break;
                }

                let round = state.round();
                emit(events, RoundEvent::RoundStarted { round, max_rounds });
                tracing::info!(round, max_rounds, "opening stream segment");

                let request = template.request(&state);
                let opened = orchestrator
                    .scheduler()
                    .execute(|| orchestrator.client().invoke_stream(&request))
                    .await;
                let mut deltas = match opened {
                    Ok(deltas) => deltas,
                    Err(err) => {
                        acc.terminate();
                        yield Err(err);
                        break;
                    }
                };

                let mut pending = PendingCalls::new();
                let mut emitted = String::new();
                let mut interrupted = false;
                while let Some(item) = deltas.next().await {
                    match item {
                        Ok(StreamDelta::Text(text)) => {
                            let out = acc.push(&text);
                            if !out.is_empty() {
                                emitted.push_str(&out);
                                yield Ok(out);
                            }
                        }
                        Ok(StreamDelta::FunctionCall { index, id, name, arguments }) => {
                            pending.absorb(index, id, name, &arguments);
                        }
                        Ok(StreamDelta::SegmentEnd) => break,
                        Err(err) => {
                            tracing::warn!(round, error = %err, "stream interrupted");
                            interrupted = true;
                            break;
                        }
                    }
                }
                drop(deltas);

                if interrupted {
                    acc.terminate();
                    yield Ok(STREAM_APOLOGY.to_string());
                    break;
                }

                let tail = acc.finish_segment();
                if !tail.is_empty() {
                    emitted.push_str(&tail);
                    yield Ok(tail);
                }

                let calls = pending.finalize();
                if calls.is_empty() {
                    acc.terminate();
                    if emitted.trim().is_empty() {
                        tracing::warn!(round, "stream segment carried neither text nor function calls");
                        emit(events, RoundEvent::Finished { rounds: round + 1, termination: Termination::InvalidResponse });
                        yield Ok(INVALID_RESPONSE_MESSAGE.to_string());
                    } else {
                        emit(events, RoundEvent::Finished { rounds: round + 1, termination: Termination::Done });
                    }
                    break;
                }

                acc.await_tool_round();
                tracing::info!(round, calls = calls.len(), "executing function calls mid-stream");
                let narrative = Some(emitted).filter(|t| !t.trim().is_empty());
                match runner.execute(&mut state, narrative, calls).await {
                    RoundVerdict::LoopDetected { name } => {
                        emit(events, RoundEvent::LoopDetected { round, name });
                        emit(events, RoundEvent::Finished { rounds: state.round(), termination: Termination::LoopDetected });
                        acc.terminate();
                        yield Ok(LOOP_DETECTED_MESSAGE.to_string());
                        break;
                    }
                    RoundVerdict::Continue => acc.reset(),
                }
            }
        })
    }
}
