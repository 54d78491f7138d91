//! Parley - 多模型对话中间层
//!
//! 模块划分：
//! - **agent**: 对外统一调用面（ask / ask_stream）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 消息模型、输入序列组装、各 Provider 原生结构转换
//! - **core**: 对外错误、失败分类、重试调度
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / DeepSeek / Anthropic / Mock）
//! - **observability**: tracing 初始化
//! - **orchestrator**: 工具调用编排循环（去重、循环检测、轮数上限）
//! - **stream**: 流式文本净化与分段续写
//! - **tools**: 函数描述、注册表与执行沙箱

pub mod agent;
pub mod config;
pub mod conversation;
pub mod core;
pub mod llm;
pub mod observability;
pub mod orchestrator;
pub mod stream;
pub mod tools;

pub use crate::agent::{AskRequest, Assistant};
pub use crate::core::RelayError;
