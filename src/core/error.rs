//! 对外错误类型
//!
//! 只有拒答（Refused）与重试耗尽 / 未分类的传输错误会越过编排层边界；
//! 函数执行失败、重复调用、死循环、轮数耗尽等都在内部吸收为结果数据或兜底文本。

use thiserror::Error;

use crate::llm::ProviderError;

/// 编排运行中越过边界的错误
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    /// 内容过滤 / 安全拒答：立即失败，从不重试
    #[error("Request refused by provider: {0}")]
    Refused(ProviderError),

    #[error("Rate limited after {attempts} attempts: {last}")]
    RateLimited { attempts: u32, last: ProviderError },

    #[error("Provider server error after {attempts} attempts: {last}")]
    TransientServer { attempts: u32, last: ProviderError },

    /// 未分类或不可重试的 Provider 错误，原样透出
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Config error: {0}")]
    Config(String),
}

impl RelayError {
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::Refused(_))
    }
}
