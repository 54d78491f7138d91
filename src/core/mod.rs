//! 核心层：对外错误、失败分类、重试调度

pub mod error;
pub mod recovery;
pub mod retry;

pub use error::RelayError;
pub use recovery::{classify, FailureClass};
pub use retry::{RetryPolicy, RetryScheduler};
