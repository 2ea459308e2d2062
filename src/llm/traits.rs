//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Qwen / Mock）实现 LlmClient：
//! chat(messages, tools) 返回文本（可能内嵌工具调用标记）与本次 token 用量。

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolSpec;

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// 模型回复
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub content: String,
    pub usage: TokenUsage,
}

/// 模型调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("empty response")]
    EmptyResponse,

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式对话；tools 为外部发现的工具声明，由实现决定如何呈现给模型
    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ChatReply, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
