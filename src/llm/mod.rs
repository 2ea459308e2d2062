//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, UsageCounter};
pub use traits::{ChatReply, LlmClient, LlmError, TokenUsage};

/// 常用 OpenAI 兼容端点
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const QWEN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
