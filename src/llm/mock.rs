//! Mock 模型客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预设输出 / 增量流，并记录每次收到的请求，便于断言调用次数与输入序列。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{
    DeltaStream, ModelClient, ModelOutput, ModelRequest, ProviderError, StreamDelta,
};

/// 脚本耗尽时的兜底回复
const EXHAUSTED_SCRIPT_REPLY: &str = "(mock script exhausted)";

/// 一段流式脚本：事件序列，可在任意位置插入错误
pub type ScriptedSegment = Vec<Result<StreamDelta, ProviderError>>;

/// 脚本化客户端：invoke 依次弹出 responses，invoke_stream 依次弹出 segments
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    responses: Mutex<VecDeque<Result<ModelOutput, ProviderError>>>,
    segments: Mutex<VecDeque<Result<ScriptedSegment, ProviderError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个成功响应
    pub fn respond(self, output: ModelOutput) -> Self {
        lock(&self.responses).push_back(Ok(output));
        self
    }

    /// 追加一个失败响应
    pub fn fail(self, error: ProviderError) -> Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    /// 追加一段流式脚本
    pub fn stream_segment(self, segment: ScriptedSegment) -> Self {
        lock(&self.segments).push_back(Ok(segment));
        self
    }

    /// 追加一次建立流失败
    pub fn fail_stream(self, error: ProviderError) -> Self {
        lock(&self.segments).push_back(Err(error));
        self
    }

    /// 已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelOutput, ProviderError> {
        lock(&self.requests).push(request.clone());
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(ModelOutput::text(EXHAUSTED_SCRIPT_REPLY)))
    }

    async fn invoke_stream(&self, request: &ModelRequest) -> Result<DeltaStream, ProviderError> {
        lock(&self.requests).push(request.clone());
        let segment = lock(&self.segments).pop_front().unwrap_or_else(|| {
            Ok(vec![
                Ok(StreamDelta::text(EXHAUSTED_SCRIPT_REPLY)),
                Ok(StreamDelta::SegmentEnd),
            ])
        })?;
        Ok(Box::pin(stream::iter(segment)))
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let client = ScriptedModelClient::new()
            .respond(ModelOutput::text("first"))
            .fail(ProviderError::http(500, "boom"));
        let req = ModelRequest::default();
        assert_eq!(client.invoke(&req).await.unwrap().text.as_deref(), Some("first"));
        assert!(client.invoke(&req).await.is_err());
        assert_eq!(
            client.invoke(&req).await.unwrap().text.as_deref(),
            Some(EXHAUSTED_SCRIPT_REPLY)
        );
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_stream_segment() {
        let client = ScriptedModelClient::new()
            .stream_segment(vec![Ok(StreamDelta::text("hi")), Ok(StreamDelta::SegmentEnd)]);
        let events: Vec<_> = client
            .invoke_stream(&ModelRequest::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
    }
}
