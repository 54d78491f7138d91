//! 重试调度
//!
//! 包装单次远程调用：失败时按 FailureClass 决定退避重试（429 / 5xx，共享同一次数预算）、
//! 立即失败（拒答）或原样抛出。429 带 retry-after 时按提示等待，否则指数退避；两者都加 ≤10% 抖动并封顶。

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::config::RetrySection;
use crate::core::{classify, FailureClass, RelayError};
use crate::llm::ProviderError;

/// 退避策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 抖动上限（相对延迟的比例，0.0 ~ 1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            jitter_factor: section.jitter_factor.clamp(0.0, 1.0),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// 第 attempt 次失败（从 0 计）后的等待时长：retry-after 提示优先，否则 initial × 2^attempt
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = match retry_after {
            Some(hint) => hint,
            None => {
                let factor = 2f64.powi(attempt.min(30) as i32);
                Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
                    .unwrap_or(self.max_delay)
            }
        };
        self.add_jitter(base.min(self.max_delay)).min(self.max_delay)
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter_factor);
        delay + delay.mul_f64(extra)
    }
}

/// 重试调度器：execute(operation) 返回成功值或已分类的 RelayError
#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 按策略的尝试次数执行
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, RelayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.execute_with_attempts(operation, self.policy.max_attempts)
            .await
    }

    /// 指定总尝试次数执行；429 与 5xx 共享同一预算，耗尽时返回最后一次错误
    pub async fn execute_with_attempts<F, Fut, T>(
        &self,
        mut operation: F,
        max_attempts: u32,
    ) -> Result<T, RelayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let class = classify(&err);
            attempt += 1;
            if !class.is_retryable() {
                return Err(terminal_error(class, err));
            }
            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %err, "retries exhausted");
                return Err(exhausted_error(class, attempt, err));
            }
            let hint = match class {
                FailureClass::RateLimited => err.retry_after_hint(),
                _ => None,
            };
            let delay = self.policy.delay_for(attempt - 1, hint);
            tracing::warn!(
                attempt,
                max_attempts,
                class = ?class,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying provider call"
            );
            sleep(delay).await;
        }
    }
}

fn terminal_error(class: FailureClass, err: ProviderError) -> RelayError {
    match class {
        FailureClass::Refused => {
            tracing::warn!(error = %err, "provider refused request");
            RelayError::Refused(err)
        }
        _ => RelayError::Provider(err),
    }
}

fn exhausted_error(class: FailureClass, attempts: u32, last: ProviderError) -> RelayError {
    match class {
        FailureClass::RateLimited => RelayError::RateLimited { attempts, last },
        FailureClass::TransientServer => RelayError::TransientServer { attempts, last },
        _ => RelayError::Provider(last),
    }
}
