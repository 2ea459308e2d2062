//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按顺序返回预置回复，并记录每次收到的消息；预置回复耗尽后回显最后一条 User 消息作为最终答案。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatReply, LlmClient, LlmError, TokenUsage};
use crate::memory::{Message, Role};
use crate::tools::ToolSpec;

/// Mock 客户端：脚本化回复 + 调用记录
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组文本回复构造
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::default();
        for r in replies {
            mock.push_reply(r);
        }
        mock
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Ok(reply.into()));
        }
    }

    pub fn push_error(&self, err: LlmError) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(err));
        }
    }

    /// 已收到的调用（每次调用的完整消息列表）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<ChatReply, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        let content = match next {
            Some(reply) => reply?,
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                format!("FINAL: Echo from Mock: {}", last_user)
            }
        };
        let usage = TokenUsage::new(
            messages.iter().map(|m| m.content.chars().count() as u64).sum(),
            content.chars().count() as u64,
        );
        Ok(ChatReply { content, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_then_echo() {
        let mock = MockLlmClient::with_replies(["one", "two"]);
        let msgs = vec![Message::user("hello")];
        assert_eq!(mock.chat(&msgs, &[]).await.unwrap().content, "one");
        assert_eq!(mock.chat(&msgs, &[]).await.unwrap().content, "two");
        let echo = mock.chat(&msgs, &[]).await.unwrap().content;
        assert!(echo.starts_with("FINAL:"));
        assert!(echo.contains("hello"));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let mock = MockLlmClient::new();
        mock.push_error(LlmError::Unavailable("down".into()));
        assert!(mock.chat(&[], &[]).await.is_err());
    }
}
