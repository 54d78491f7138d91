//! 对话层：消息模型、输入序列组装、各 Provider 原生结构转换

pub mod anthropic;
pub mod builder;
pub mod message;
pub mod openai;

pub use builder::ConversationBuilder;
pub use message::{Message, Role};
