//! 会话历史：按 session_id 保存最近 N 轮对话
//!
//! SessionHistoryStore 是引擎消费的外部协作方接口；InMemoryHistoryStore 为进程内实现，
//! 文件实现见 persistence.rs。追加时丢弃空内容片段，并裁剪为最近 max_turns*2 条。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::Message;

/// 会话历史存储
#[async_trait]
pub trait SessionHistoryStore: Send + Sync {
    /// 读取某会话的历史；不存在时返回空
    async fn get(&self, session_id: &str) -> anyhow::Result<Vec<Message>>;

    /// 追加若干片段并裁剪，返回裁剪后的完整历史
    async fn append(
        &self,
        session_id: &str,
        segments: Vec<Message>,
        max_turns: usize,
    ) -> anyhow::Result<Vec<Message>>;

    async fn clear(&self, session_id: &str) -> anyhow::Result<()>;
}

/// 合并并裁剪：丢弃空内容，保留最近 max_turns*2 条
pub(crate) fn merge_segments(
    mut prev: Vec<Message>,
    segments: Vec<Message>,
    max_turns: usize,
) -> Vec<Message> {
    prev.extend(segments.into_iter().filter(|m| !m.content.trim().is_empty()));
    let keep = max_turns * 2;
    if prev.len() > keep {
        prev.drain(..prev.len() - keep);
    }
    prev
}

/// 进程内会话历史（读写锁保护，多会话并发安全）
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionHistoryStore for InMemoryHistoryStore {
    async fn get(&self, session_id: &str) -> anyhow::Result<Vec<Message>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(
        &self,
        session_id: &str,
        segments: Vec<Message>,
        max_turns: usize,
    ) -> anyhow::Result<Vec<Message>> {
        let mut sessions = self.sessions.write().await;
        let prev = sessions.remove(session_id).unwrap_or_default();
        let next = merge_segments(prev, segments, max_turns);
        sessions.insert(session_id.to_string(), next.clone());
        Ok(next)
    }

    async fn clear(&self, session_id: &str) -> anyhow::Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_trims_to_max_turns() {
        let store = InMemoryHistoryStore::new();
        for i in 0..5 {
            store
                .append(
                    "s1",
                    vec![Message::user(format!("q{i}")), Message::assistant(format!("a{i}"))],
                    2,
                )
                .await
                .unwrap();
        }
        let history = store.get("s1").await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "q3");
        assert_eq!(history[3].content, "a4");
    }

    #[tokio::test]
    async fn test_empty_segments_dropped_and_sessions_isolated() {
        let store = InMemoryHistoryStore::new();
        store
            .append("a", vec![Message::user("hi"), Message::assistant("  ")], 12)
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap().len(), 1);
        assert!(store.get("b").await.unwrap().is_empty());
        store.clear("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_empty());
    }
}
