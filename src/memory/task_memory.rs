//! 子任务结果记忆
//!
//! 每个完成的子任务追加一条 TaskResultMemory，供后续子任务按需检索注入。
//! 按 session 隔离，避免不同会话之间的子任务结果互相泄漏。

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::memory::selector::Selectable;
use crate::memory::Message;

const SNIPPET_CHARS: usize = 120;

/// 一条子任务结果记忆（创建后只读）
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultMemory {
    pub index: usize,
    pub title: String,
    pub snippet: String,
    pub content: String,
    pub meta: serde_json::Value,
    pub created_at: i64,
}

impl TaskResultMemory {
    pub fn new(index: usize, title: &str, deliverable: &str, content: &str) -> Self {
        let head: String = content.chars().take(SNIPPET_CHARS).collect();
        Self {
            index,
            title: title.to_string(),
            snippet: format!("{}: {}", title, head),
            content: content.to_string(),
            meta: serde_json::json!({ "deliverable": deliverable }),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn to_message(&self) -> Message {
        Message::assistant(format!(
            "已完成子任务「{}」，结果是：\n\n{}",
            self.title, self.content
        ))
    }
}

impl Selectable for TaskResultMemory {
    fn selection_line(&self) -> String {
        format!("task#{} | {}", self.index, self.snippet)
    }
}

/// 按 session 隔离的子任务结果记忆
#[derive(Debug, Default)]
pub struct TaskMemoryStore {
    sessions: RwLock<HashMap<String, Vec<TaskResultMemory>>>,
}

impl TaskMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, session_id: &str, memory: TaskResultMemory) {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(memory);
    }

    /// 该会话的全部结果记忆（按创建顺序）
    pub async fn all(&self, session_id: &str) -> Vec<TaskResultMemory> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}
