//! 失败分类
//!
//! 根据 ProviderError 的状态码与内容返回 FailureClass，供 RetryScheduler 决定是退避重试、立即失败还是原样抛出。

use std::sync::OnceLock;

use regex::Regex;

use crate::llm::ProviderError;

/// 远程调用失败的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 429：可重试，优先使用 retry-after 提示
    RateLimited,
    /// 5xx：可重试，指数退避
    TransientServer,
    /// 400 + 内容过滤 / 安全拒答 / 明确拒答：致命，不重试
    Refused,
    /// 其他 4xx 且含拒绝语义：不重试
    Rejected,
    /// 其余错误：零重试，原样抛出
    Unclassified,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientServer)
    }
}

/// 内容过滤 / 安全拒答的标记
fn content_filter_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)content[\s_-]?(filter|policy|management)|safety|refus(al|ed|e)").ok()
    })
    .as_ref()
}

/// 一般拒绝语义（"refuse" / "cannot" / "forbidden"）
fn refusal_language_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)refus|cannot|can't|forbidden").ok())
        .as_ref()
}

fn matches(re: Option<&Regex>, text: &str) -> bool {
    re.is_some_and(|re| re.is_match(text))
}

/// 按状态码与错误内容分类
pub fn classify(err: &ProviderError) -> FailureClass {
    let Some(status) = err.effective_status() else {
        return FailureClass::Unclassified;
    };
    let text = err.searchable_text();
    match status {
        429 => FailureClass::RateLimited,
        500..=599 => FailureClass::TransientServer,
        400 if matches(content_filter_re(), &text) => FailureClass::Refused,
        400..=499 if matches(refusal_language_re(), &text) => FailureClass::Rejected,
        _ => FailureClass::Unclassified,
    }
}
