//! 工具调用编排：轮次状态、签名去重与循环检测、单轮执行、主循环、过程事件

pub mod events;
pub mod loop_;
pub(crate) mod round;
pub mod state;

pub use events::RoundEvent;
pub use loop_::{
    Outcome, RunInput, Termination, ToolCallOrchestrator, INVALID_RESPONSE_MESSAGE,
    LOOP_DETECTED_MESSAGE, ROUNDS_EXHAUSTED_MESSAGE,
};
pub use state::{CallSignature, RoundState, SignatureWindow};
