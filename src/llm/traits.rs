//! 模型客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Anthropic / Mock）实现 ModelClient：invoke（非流式）、invoke_stream（增量事件流）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::llm::{ModelOutput, ModelRequest, ProviderError, StreamDelta};

/// 增量事件流：每段以 SegmentEnd 结束（或直接结束）
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, ProviderError>> + Send>>;

/// 模型客户端 trait：非流式调用与流式调用
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// 非流式调用，返回归一化输出
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelOutput, ProviderError>;

    /// 流式调用，返回增量事件流；建立连接失败时直接返回 Err
    async fn invoke_stream(&self, request: &ModelRequest) -> Result<DeltaStream, ProviderError>;

    /// Provider 名称（日志用）
    fn provider(&self) -> &str {
        "unknown"
    }
}
