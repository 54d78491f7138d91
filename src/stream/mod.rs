//! 流式路径：文本累积状态机、函数调用片段缓冲、分段续写协调

pub mod accumulator;
pub mod pending;
pub mod reconciler;

pub use accumulator::{AccumulatorState, StreamAccumulator};
pub use pending::PendingCalls;
pub use reconciler::{StreamReconciler, TextStream, STREAM_APOLOGY};
