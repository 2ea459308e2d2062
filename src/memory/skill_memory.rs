//! 技能记忆：缓存已加载过的技能正文、参考文件与脚本结果
//!
//! 每次技能工具调用成功都会生成一条 MemoryEntry；(skill, toolName, reference, script) 为去重标识，
//! 同 key 的新条目覆盖旧条目并刷新 updatedAt。候选池按更新时间排序，最新的在末尾。

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::memory::document_store::MemoryDocumentStore;
use crate::memory::selector::Selectable;
use crate::memory::Message;

/// snippet 回退时截取正文的字符数
const SNIPPET_FALLBACK_CHARS: usize = 120;

/// 产生记忆的技能子操作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkillToolName {
    Read,
    ReadReference,
    Call,
}

impl SkillToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillToolName::Read => "read",
            SkillToolName::ReadReference => "readReference",
            SkillToolName::Call => "call",
        }
    }
}

/// 记忆去重标识
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MemoryKey {
    pub skill: String,
    pub tool_name: SkillToolName,
    pub reference: Option<String>,
    pub script: Option<String>,
}

/// 一条技能记忆
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub tool_name: SkillToolName,
    pub skill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    pub content: String,
    pub snippet: String,
    #[serde(default)]
    pub meta: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub deprecated: bool,
}

/// meta.name + meta.description 作为 snippet；缺失时截取正文
fn snippet_from(meta: &serde_json::Value, content: &str) -> String {
    let field = |k: &str| {
        meta.get(k)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let (name, description) = (field("name"), field("description"));
    if !name.is_empty() || !description.is_empty() {
        return format!("{}: {}", name, description);
    }
    content.chars().take(SNIPPET_FALLBACK_CHARS).collect()
}

impl MemoryEntry {
    fn build(
        tool_name: SkillToolName,
        skill: &str,
        reference: Option<String>,
        script: Option<String>,
        content: String,
        meta: serde_json::Value,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            tool_name,
            skill: skill.to_string(),
            reference,
            script,
            snippet: snippet_from(&meta, &content),
            content,
            meta,
            created_at: now,
            updated_at: now,
            deprecated: false,
        }
    }

    /// 技能正文（read）
    pub fn from_read(skill: &str, meta: serde_json::Value, body: impl Into<String>) -> Self {
        Self::build(SkillToolName::Read, skill, None, None, body.into(), meta)
    }

    /// 参考文件（readReference）
    pub fn from_reference(
        skill: &str,
        file: &str,
        meta: serde_json::Value,
        content: impl Into<String>,
    ) -> Self {
        Self::build(
            SkillToolName::ReadReference,
            skill,
            Some(file.to_string()),
            None,
            content.into(),
            meta,
        )
    }

    /// 脚本结果（call）；meta 中保留入参，snippet 描述脚本与入参
    pub fn from_call(
        skill: &str,
        script: &str,
        params: &serde_json::Value,
        result: &serde_json::Value,
    ) -> Self {
        let content = match result {
            serde_json::Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        };
        let meta = serde_json::json!({
            "name": format!("{} {}", skill, script),
            "description": format!("params={}", params),
            "params": params,
        });
        Self::build(
            SkillToolName::Call,
            skill,
            None,
            Some(script.to_string()),
            content,
            meta,
        )
    }

    pub fn key(&self) -> MemoryKey {
        MemoryKey {
            skill: self.skill.clone(),
            tool_name: self.tool_name,
            reference: self.reference.clone(),
            script: self.script.clone(),
        }
    }

    /// 转为「已加载」的 assistant 消息，注入上下文
    pub fn to_message(&self) -> Message {
        let skill = if self.skill.is_empty() { "未知技能" } else { self.skill.as_str() };
        let header = match (self.tool_name, &self.reference, &self.script) {
            (SkillToolName::ReadReference, Some(r), _) => {
                format!("已加载技能「{}」的参考文件「{}」，内容是：", skill, r)
            }
            (SkillToolName::Call, _, Some(s)) => {
                format!("已执行技能「{}」的脚本「{}」，结果是：", skill, s)
            }
            _ => format!("已加载技能「{}」的正文，内容是：", skill),
        };
        Message::assistant(format!("{}\n\n{}", header, self.content))
    }
}

impl Selectable for MemoryEntry {
    fn selection_line(&self) -> String {
        let mut line = format!("skill={} tool={}", self.skill, self.tool_name.as_str());
        if let Some(r) = &self.reference {
            line.push_str(&format!(" reference={}", r));
        }
        if let Some(s) = &self.script {
            line.push_str(&format!(" script={}", s));
        }
        format!("{} | {}", line, self.snippet)
    }
}

/// 技能记忆候选池：进程内共享，读写锁保护；可选落盘到文档存储
pub struct SkillMemoryPool {
    entries: RwLock<Vec<MemoryEntry>>,
    store: Option<Arc<dyn MemoryDocumentStore>>,
}

impl SkillMemoryPool {
    pub fn new(store: Option<Arc<dyn MemoryDocumentStore>>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            store,
        }
    }

    /// 从文档存储预热候选池，返回载入条数
    pub async fn load_from_store(&self) -> anyhow::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let mut loaded = store.load().await?;
        loaded.sort_by_key(|e| e.updated_at);
        let n = loaded.len();
        for entry in loaded {
            self.upsert_in_pool(entry).await;
        }
        Ok(n)
    }

    async fn upsert_in_pool(&self, entry: MemoryEntry) {
        let key = entry.key();
        let mut entries = self.entries.write().await;
        if let Some(pos) = entries.iter().position(|e| e.key() == key) {
            let prev = entries.remove(pos);
            let mut entry = entry;
            entry.created_at = prev.created_at;
            entries.push(entry);
        } else {
            entries.push(entry);
        }
    }

    /// 记录一条新记忆：覆盖同 key 条目、刷新 updatedAt，并写入文档存储（失败仅告警）
    pub async fn record(&self, mut entry: MemoryEntry) {
        entry.updated_at = chrono::Utc::now().timestamp_millis();
        self.upsert_in_pool(entry.clone()).await;
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&entry).await {
                tracing::warn!(skill = %entry.skill, error = %e, "memory document save failed");
            }
        }
    }

    /// 按更新时间排序的全部候选，排除已注入的 key
    pub async fn candidates(&self, exclude: &HashSet<MemoryKey>) -> Vec<MemoryEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| !e.deprecated && !exclude.contains(&e.key()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_prefers_meta() {
        let e = MemoryEntry::from_read(
            "poem_writer",
            serde_json::json!({"name": "poem_writer", "description": "写古诗"}),
            "正文",
        );
        assert_eq!(e.snippet, "poem_writer: 写古诗");

        let e = MemoryEntry::from_read("x", serde_json::Value::Null, "a".repeat(300));
        assert_eq!(e.snippet.chars().count(), 120);
    }

    #[test]
    fn test_message_wording() {
        let e = MemoryEntry::from_reference(
            "poem_writer",
            "references/qijue.md",
            serde_json::Value::Null,
            "七绝格律",
        );
        let msg = e.to_message();
        assert!(msg.content.starts_with("已加载技能「poem_writer」的参考文件「references/qijue.md」"));
        assert!(msg.content.ends_with("七绝格律"));
    }

    #[tokio::test]
    async fn test_record_overwrites_same_key_and_moves_to_newest() {
        let pool = SkillMemoryPool::new(None);
        pool.record(MemoryEntry::from_read("a", serde_json::Value::Null, "v1")).await;
        pool.record(MemoryEntry::from_read("b", serde_json::Value::Null, "b")).await;
        pool.record(MemoryEntry::from_read("a", serde_json::Value::Null, "v2")).await;

        let all = pool.candidates(&HashSet::new()).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].skill, "b");
        assert_eq!(all[1].content, "v2");
    }

    #[tokio::test]
    async fn test_candidates_exclude_injected() {
        let pool = SkillMemoryPool::new(None);
        let a = MemoryEntry::from_read("a", serde_json::Value::Null, "x");
        pool.record(a.clone()).await;
        pool.record(MemoryEntry::from_read("b", serde_json::Value::Null, "y")).await;
        let exclude: HashSet<MemoryKey> = [a.key()].into_iter().collect();
        let left = pool.candidates(&exclude).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].skill, "b");
    }
}
