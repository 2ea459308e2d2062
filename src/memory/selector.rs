//! 记忆选择器：从最近的候选中挑出与当前问题相关的条目
//!
//! 候选池只取最近 limit × multiplier 条（按时间排序，不扫全量）。
//! 没有模型时直接返回最近 limit 条；有模型时只给模型看编号 + 简短 snippet，
//! 让它返回所选编号的 JSON 数组（空数组表示都不相关）。模型调用失败时回退到最近 limit 条。

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::events::{AgentEvent, EventSink};
use crate::react::protocol::parse_index_array;

/// 可被选择器展示的候选
pub trait Selectable: Clone {
    /// 展示给选择模型的一行描述（不含完整正文）
    fn selection_line(&self) -> String;
}

/// 记忆选择器
#[derive(Clone)]
pub struct MemorySelector {
    llm: Option<Arc<dyn LlmClient>>,
    limit: usize,
    multiplier: usize,
}

impl MemorySelector {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, limit: usize, multiplier: usize) -> Self {
        Self {
            llm,
            limit: limit.max(1),
            multiplier: multiplier.max(1),
        }
    }

    /// candidates 按时间升序（最新在末尾）；返回结果保持候选池中的顺序
    pub async fn select<T: Selectable>(
        &self,
        queries: &[String],
        candidates: &[T],
        events: &EventSink,
    ) -> Vec<T> {
        let pool_size = self.limit * self.multiplier;
        let pool = &candidates[candidates.len().saturating_sub(pool_size)..];
        if pool.is_empty() {
            return Vec::new();
        }
        let fallback = || pool[pool.len().saturating_sub(self.limit)..].to_vec();

        let Some(llm) = &self.llm else {
            return fallback();
        };

        let messages = build_selector_messages(queries, pool);
        let reply = match llm.chat(&messages, &[]).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "memory selection failed, falling back to most recent");
                return fallback();
            }
        };
        events.emit(AgentEvent::LlmUsage { usage: reply.usage });

        let indices = match parse_index_array(&reply.content) {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(error = %e, "memory selection reply unparseable, selecting none");
                return Vec::new();
            }
        };
        let picked: BTreeSet<usize> = indices.into_iter().filter(|i| *i < pool.len()).collect();
        picked
            .into_iter()
            .take(self.limit)
            .map(|i| pool[i].clone())
            .collect()
    }
}

fn build_selector_messages<T: Selectable>(queries: &[String], pool: &[T]) -> Vec<Message> {
    let questions: Vec<String> = queries
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .enumerate()
        .map(|(i, q)| {
            if queries.len() > 1 {
                format!("[{}] {}", i + 1, q)
            } else {
                q.to_string()
            }
        })
        .collect();
    let items: Vec<String> = pool
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i, c.selection_line()))
        .collect();

    let system = "You are a selector that chooses useful memory entries for an AI assistant \
                  based on recent user questions and conversation context. \
                  You MUST respond with a single JSON array of indices and nothing else.";
    let user = format!(
        "User questions (most recent last):\n{}\n\nMemories:\n{}\n\n\
         Pick only entries that are clearly helpful to answer the user questions. \
         Return ONLY a JSON array of selected indices, like [0, 2]. \
         If nothing is relevant, return an empty array [].",
        questions.join("\n"),
        items.join("\n")
    );
    vec![Message::system(system), Message::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};

    #[derive(Clone, Debug, PartialEq)]
    struct Item(&'static str);

    impl Selectable for Item {
        fn selection_line(&self) -> String {
            self.0.to_string()
        }
    }

    fn items() -> Vec<Item> {
        vec![Item("a"), Item("b"), Item("c"), Item("d"), Item("e")]
    }

    #[tokio::test]
    async fn test_empty_pool_selects_nothing() {
        let mock = Arc::new(MockLlmClient::new());
        let selector = MemorySelector::new(Some(mock.clone()), 2, 2);
        let out: Vec<Item> = selector.select(&["q".into()], &[], &EventSink::none()).await;
        assert!(out.is_empty());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_without_model_returns_most_recent() {
        let selector = MemorySelector::new(None, 2, 2);
        let out = selector.select(&["q".into()], &items(), &EventSink::none()).await;
        assert_eq!(out, vec![Item("d"), Item("e")]);
    }

    #[tokio::test]
    async fn test_model_picks_by_index_within_recent_pool() {
        // 池为最近 4 条：b c d e
        let mock = Arc::new(MockLlmClient::with_replies(["选择结果：[0, 2, 9]"]));
        let selector = MemorySelector::new(Some(mock.clone()), 2, 2);
        let out = selector.select(&["q".into()], &items(), &EventSink::none()).await;
        assert_eq!(out, vec![Item("b"), Item("d")]);
        let prompt = &mock.calls()[0][1].content;
        assert!(!prompt.contains("0. a"));
        assert!(prompt.contains("0. b"));
    }

    #[tokio::test]
    async fn test_empty_array_means_none() {
        let mock = Arc::new(MockLlmClient::with_replies(["[]"]));
        let selector = MemorySelector::new(Some(mock), 2, 2);
        let out = selector.select(&["q".into()], &items(), &EventSink::none()).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_model_error_falls_back() {
        let mock = MockLlmClient::new();
        mock.push_error(LlmError::Unavailable("down".into()));
        let selector = MemorySelector::new(Some(Arc::new(mock)), 1, 3);
        let out = selector.select(&["q".into()], &items(), &EventSink::none()).await;
        assert_eq!(out, vec![Item("e")]);
    }
}
