//! LLM 层：客户端抽象、归一化类型与各 Provider 适配（OpenAI 兼容 / DeepSeek / Anthropic / Mock）

pub mod anthropic;
pub mod error;
pub mod mock;
pub mod openai;
pub mod traits;
pub mod types;

use std::sync::Arc;

pub use anthropic::AnthropicClient;
pub use error::ProviderError;
pub use mock::ScriptedModelClient;
pub use openai::{OpenAiClient, DEEPSEEK_BASE_URL};
pub use traits::{DeltaStream, ModelClient};
pub use types::{
    synthetic_call_id, FunctionCall, FunctionSpec, ModelOutput, ModelRequest, StreamDelta,
    TokenUsage, ToolChoice, Verbosity,
};

use crate::config::LlmSection;
use crate::core::RelayError;

/// 按 [llm] 配置构建客户端：openai / deepseek / anthropic
pub fn create_client_from_config(cfg: &LlmSection) -> Result<Arc<dyn ModelClient>, RelayError> {
    let api_key = cfg
        .api_key_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok());
    match cfg.provider.to_ascii_lowercase().as_str() {
        "openai" => Ok(Arc::new(OpenAiClient::new(
            cfg.base_url.as_deref(),
            &cfg.model,
            api_key.as_deref(),
        )?)),
        "deepseek" => Ok(Arc::new(OpenAiClient::deepseek(
            Some(cfg.model.as_str()).filter(|m| !m.is_empty()),
            api_key.as_deref(),
        )?)),
        "anthropic" => Ok(Arc::new(AnthropicClient::new(
            cfg.base_url.as_deref(),
            &cfg.model,
            api_key.as_deref(),
        )?)),
        other => Err(RelayError::Config(format!("unknown provider: {other}"))),
    }
}
