//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 OpenAI、DeepSeek、Qwen（DashScope）等。
//! 工具调用走文本标记协议，外部工具声明以一条 system 消息的形式追加在消息末尾之前。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{ChatReply, LlmClient, LlmError, TokenUsage};
use crate::memory::{Message, Role};
use crate::tools::{render_tool_catalog, ToolSpec};

/// 累计 token 计数器
#[derive(Debug, Clone, Default)]
pub struct UsageCounter {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl UsageCounter {
    pub fn add(&self, usage: &TokenUsage) {
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.total_tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名，chat 时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    pub usage: UsageCounter,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: UsageCounter::default(),
        }
    }

    fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
        let built = match m.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map(ChatCompletionRequestMessage::System),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map(ChatCompletionRequestMessage::User),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map(ChatCompletionRequestMessage::Assistant),
        };
        built.map_err(|e| LlmError::Request(e.to_string()))
    }

    /// 组装请求消息：有外部工具时，在最后一条消息之前插入工具目录
    fn build_messages(
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut all: Vec<Message> = messages.to_vec();
        if !tools.is_empty() {
            let at = all.len().saturating_sub(1);
            all.insert(at, Message::system(render_tool_catalog(tools)));
        }
        all.iter().map(Self::to_openai_message).collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ChatReply, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::build_messages(messages, tools)?)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage::new(u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or_default();
        self.usage.add(&usage);

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or(LlmError::EmptyResponse)?;

        Ok(ChatReply { content, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_catalog_inserted_before_last_message() {
        let messages = vec![Message::system("sys"), Message::user("hi")];
        let tools = vec![ToolSpec::new("search", "web search", serde_json::json!({}))];
        let built = OpenAiClient::build_messages(&messages, &tools).unwrap();
        assert_eq!(built.len(), 3);
        assert!(matches!(built[1], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(built[2], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_usage_counter_accumulates() {
        let counter = UsageCounter::default();
        counter.add(&TokenUsage::new(10, 5));
        counter.add(&TokenUsage::new(1, 1));
        assert_eq!(counter.get(), (11, 6, 17));
    }
}
