//! 远程调用失败的统一形态
//!
//! 各 Provider 的错误结构差异很大（OpenAI `error.code`、Anthropic `error.type`、Gemini `error.status`……），
//! 适配层统一转为 ProviderError；状态码与 retry-after 提示按多种约定宽松解析，供重试调度分类使用。

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use thiserror::Error;

/// 一次远程调用的失败：状态码、错误码、消息、retry-after 提示、原始 body（均可缺省）
#[derive(Error, Debug, Clone)]
pub struct ProviderError {
    pub status: Option<u16>,
    /// Provider 自带的错误码或类型（如 content_filter、rate_limit_error）
    pub code: Option<String>,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub body: Option<Value>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            retry_after: None,
            body: None,
        }
    }

    /// 带 HTTP 状态码的错误
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(message).with_status(status)
    }

    /// 传输层错误（连接中断、反序列化失败等），不带状态码
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(message)
    }

    /// 模型侧拒答（如 OpenAI `message.refusal`），按 400 + content_filter 处理
    pub fn refusal(message: impl Into<String>) -> Self {
        Self::http(400, message).with_code("refusal")
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// 从 JSON 错误 body 构造：message / code 按常见约定提取
    pub fn from_body(status: Option<u16>, body: Value) -> Self {
        let message = body
            .pointer("/error/message")
            .or_else(|| body.get("message"))
            .and_then(Value::as_str)
            .or_else(|| body.as_str())
            .map(String::from)
            .unwrap_or_else(|| body.to_string());
        let code = body
            .pointer("/error/code")
            .and_then(Value::as_str)
            .or_else(|| body.pointer("/error/type").and_then(Value::as_str))
            .or_else(|| body.get("code").and_then(Value::as_str))
            .map(String::from);
        Self {
            status,
            code,
            message,
            retry_after: None,
            body: Some(body),
        }
    }

    /// 非 2xx 响应：状态码 + 错误体（非 JSON 时保留原文）+ retry-after 头
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let retry_after = retry_after_header(response.headers());
        let payload = match response.text().await {
            Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            Err(e) => return Self::http(status, e.to_string()),
        };
        let mut err = Self::from_body(Some(status), payload);
        if let Some(delay) = retry_after {
            err = err.with_retry_after(delay);
        }
        err
    }

    /// 实际生效的状态码：显式字段优先，其次从 body / 错误码推断
    pub fn effective_status(&self) -> Option<u16> {
        if let Some(s) = self.status {
            return Some(s);
        }
        if let Some(body) = &self.body {
            let numeric = ["/status", "/statusCode", "/status_code", "/error/code", "/error/status"]
                .iter()
                .find_map(|p| body.pointer(p).and_then(value_as_status));
            if numeric.is_some() {
                return numeric;
            }
            let token = ["/error/status", "/error/type", "/error/code", "/type"]
                .iter()
                .find_map(|p| body.pointer(p).and_then(Value::as_str).and_then(status_from_token));
            if token.is_some() {
                return token;
            }
        }
        self.code.as_deref().and_then(status_from_token)
    }

    /// retry-after 提示：显式字段 → body 字段 → 消息文本（"retry after 20s" / "try again in 1.5s"）
    pub fn retry_after_hint(&self) -> Option<Duration> {
        if self.retry_after.is_some() {
            return self.retry_after;
        }
        if let Some(body) = &self.body {
            let secs = ["/retry_after", "/retryAfter", "/error/retry_after", "/error/retryAfter"]
                .iter()
                .find_map(|p| body.pointer(p).and_then(value_as_secs));
            if let Some(hint) = secs.and_then(secs_to_duration) {
                return Some(hint);
            }
        }
        retry_after_from_text(&self.message)
    }

    /// 用于拒答识别的全部文本：code + message + body
    pub fn searchable_text(&self) -> String {
        let mut text = self.message.clone();
        if let Some(code) = &self.code {
            text.push(' ');
            text.push_str(code);
        }
        if let Some(body) = &self.body {
            text.push(' ');
            text.push_str(&body.to_string());
        }
        text
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.effective_status(), &self.code) {
            (Some(s), Some(c)) => write!(f, "[{s} {c}] {}", self.message),
            (Some(s), None) => write!(f, "[{s}] {}", self.message),
            (None, Some(c)) => write!(f, "[{c}] {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

fn value_as_status(v: &Value) -> Option<u16> {
    let n = match v {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (100..600).contains(&n).then_some(n as u16)
}

fn value_as_secs(v: &Value) -> Option<f64> {
    let secs = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('s').parse::<f64>().ok()?,
        _ => return None,
    };
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// 各家错误码 / 状态字符串到 HTTP 状态码的映射
fn status_from_token(token: &str) -> Option<u16> {
    match token.to_ascii_lowercase().as_str() {
        "rate_limit_exceeded" | "rate_limit_error" | "resource_exhausted" | "too_many_requests"
        | "insufficient_quota" => Some(429),
        "overloaded_error" | "unavailable" | "service_unavailable" => Some(503),
        "server_error" | "api_error" | "internal" | "internal_error" => Some(500),
        "content_filter" | "content_policy_violation" | "invalid_request_error"
        | "invalid_argument" | "refusal" => Some(400),
        "permission_error" | "permission_denied" => Some(403),
        _ => None,
    }
}

pub(crate) fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(secs_to_duration)
}

fn retry_after_from_text(text: &str) -> Option<Duration> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| {
            Regex::new(r"(?i)(?:retry|try again)\s+(?:after|in)\s+(\d+(?:\.\d+)?)\s*(ms|s|sec|seconds?)?")
                .ok()
        })
        .as_ref()?;
    let caps = re.captures(text)?;
    let n: f64 = caps.get(1)?.as_str().parse().ok()?;
    let secs = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(unit) if unit == "ms" => n / 1000.0,
        _ => n,
    };
    secs_to_duration(secs)
}

/// 秒数 → Duration；溢出、NaN、负数视为无效提示
pub(crate) fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_status_from_gemini_body() {
        let err = ProviderError::from_body(
            None,
            json!({"error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": "quota"}}),
        );
        assert_eq!(err.effective_status(), Some(429));
    }

    #[test]
    fn test_status_from_anthropic_error_type() {
        let err = ProviderError::from_body(
            None,
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        );
        assert_eq!(err.effective_status(), Some(503));
        assert_eq!(err.message, "Overloaded");
    }

    #[test]
    fn test_status_from_openai_code() {
        let err = ProviderError::new("slow down").with_code("rate_limit_exceeded");
        assert_eq!(err.effective_status(), Some(429));
    }

    #[test]
    fn test_explicit_status_wins() {
        let err = ProviderError::http(502, "bad gateway").with_code("rate_limit_exceeded");
        assert_eq!(err.effective_status(), Some(502));
    }

    #[test]
    fn test_retry_after_from_body_and_text() {
        let err = ProviderError::from_body(Some(429), json!({"error": {"retry_after": "2"}}));
        assert_eq!(err.retry_after_hint(), Some(Duration::from_secs(2)));

        let err = ProviderError::http(429, "Rate limit reached. Please try again in 1.5s.");
        assert_eq!(err.retry_after_hint(), Some(Duration::from_millis(1500)));

        let err = ProviderError::http(429, "Please retry after 300ms");
        assert_eq!(err.retry_after_hint(), Some(Duration::from_millis(300)));

        assert_eq!(ProviderError::http(429, "slow down").retry_after_hint(), None);
    }

    #[test]
    fn test_oversized_retry_after_is_dropped() {
        let err = ProviderError::http(429, "retry after 99999999999999999999999s");
        assert_eq!(err.retry_after_hint(), None);

        let err = ProviderError::from_body(Some(429), json!({"retry_after": 1e30}));
        assert_eq!(err.retry_after_hint(), None);
    }

    #[test]
    fn test_retry_after_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after_header(&headers), Some(Duration::from_secs(7)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after_header(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e30"));
        assert_eq!(retry_after_header(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("inf"));
        assert_eq!(retry_after_header(&headers), None);
    }

    #[test]
    fn test_display_includes_status() {
        let err = ProviderError::http(500, "boom");
        assert_eq!(err.to_string(), "[500] boom");
    }
}
