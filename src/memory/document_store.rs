//! 记忆文档存储：每条技能记忆一个 JSON 文件
//!
//! 文件名由记忆 key 决定（同 key 覆盖写）：
//! - `<skill>-skill.json`
//! - `<skill>-reference-<ref>.json`
//! - `<skill>-call-<script>-<desc>.json`
//!
//! `<ref>` 与 `<script>` 取技能目录内的完整相对路径（去掉 `references/`、`scripts/` 前缀），
//! 不同子目录下的同名文件不会互相覆盖。
//!
//! load 时跳过无法解析、字段不全或已废弃（deprecated）的文档。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::memory::skill_memory::{MemoryEntry, SkillToolName};

/// 记忆文档存储接口
#[async_trait]
pub trait MemoryDocumentStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<MemoryEntry>>;

    async fn save(&self, entry: &MemoryEntry) -> anyhow::Result<()>;
}

/// 文件名片段：小写、空白与路径分隔符转 `-`，只保留字母数字、中文、`_` 与 `-`
fn slugify(input: &str, max_len: usize) -> String {
    let lowered = input.trim().to_lowercase();
    let lowered = lowered
        .strip_suffix(".md")
        .or_else(|| lowered.strip_suffix(".js"))
        .or_else(|| lowered.strip_suffix(".py"))
        .unwrap_or(&lowered);
    let mut out = String::new();
    for c in lowered.chars() {
        let c = if c.is_whitespace() || c == '/' || c == '\\' { '-' } else { c };
        let keep = c.is_ascii_alphanumeric()
            || c == '-'
            || c == '_'
            || ('\u{4e00}'..='\u{9fa5}').contains(&c);
        if !keep || (c == '-' && out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    let out = out.trim_matches('-');
    if out.is_empty() {
        return "unknown".to_string();
    }
    out.chars().take(max_len).collect()
}

/// 按记忆 key 生成文件名
pub fn file_name_for(entry: &MemoryEntry) -> String {
    let skill = slugify(&entry.skill, 60);
    match entry.tool_name {
        SkillToolName::Read => format!("{}-skill.json", skill),
        SkillToolName::ReadReference => {
            let reference = entry.reference.as_deref().unwrap_or_default();
            let rel = reference.strip_prefix("references/").unwrap_or(reference);
            format!("{}-reference-{}.json", skill, slugify(rel, 80))
        }
        SkillToolName::Call => {
            let script = entry.script.as_deref().unwrap_or("script");
            let base = script.strip_prefix("scripts/").unwrap_or(script);
            let desc = entry
                .meta
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("no-desc");
            format!("{}-call-{}-{}.json", skill, slugify(base, 60), slugify(desc, 80))
        }
    }
}

/// 校验：skill 与 content 非空；readReference 必须带 reference，call 必须带 script
fn is_valid(entry: &MemoryEntry) -> bool {
    if entry.skill.trim().is_empty() || entry.content.is_empty() {
        return false;
    }
    match entry.tool_name {
        SkillToolName::Read => true,
        SkillToolName::ReadReference => entry.reference.as_deref().is_some_and(|r| !r.is_empty()),
        SkillToolName::Call => entry.script.as_deref().is_some_and(|s| !s.is_empty()),
    }
}

/// JSON 文件目录存储
#[derive(Debug, Clone)]
pub struct JsonFileMemoryStore {
    dir: PathBuf,
}

impl JsonFileMemoryStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl MemoryDocumentStore for JsonFileMemoryStore {
    async fn load(&self) -> anyhow::Result<Vec<MemoryEntry>> {
        let mut out = Vec::new();
        let mut rd = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(dirent) = rd.next_entry().await? {
            let path = dirent.path();
            let name = dirent.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let Ok(text) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            match serde_json::from_str::<MemoryEntry>(&text) {
                Ok(entry) if is_valid(&entry) && !entry.deprecated => out.push(entry),
                Ok(_) => {}
                Err(e) => tracing::debug!(file = %name, error = %e, "skip invalid memory document"),
            }
        }
        Ok(out)
    }

    async fn save(&self, entry: &MemoryEntry) -> anyhow::Result<()> {
        if !is_valid(entry) {
            anyhow::bail!("memory document requires skill, content and its key fields");
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name_for(entry));
        tokio::fs::write(&path, serde_json::to_string_pretty(entry)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_names() {
        let read = MemoryEntry::from_read("Poem Writer", serde_json::Value::Null, "x");
        assert_eq!(file_name_for(&read), "poem-writer-skill.json");

        let r = MemoryEntry::from_reference("poem_writer", "references/qi jue.md", serde_json::Value::Null, "x");
        assert_eq!(file_name_for(&r), "poem_writer-reference-qi-jue.json");
    }

    #[test]
    fn test_file_names_do_not_collide() {
        let a = MemoryEntry::from_reference("poem_writer", "references/a/x.md", serde_json::Value::Null, "x");
        let b = MemoryEntry::from_reference("poem_writer", "references/b/x.md", serde_json::Value::Null, "x");
        assert_eq!(file_name_for(&a), "poem_writer-reference-a-x.json");
        assert_ne!(file_name_for(&a), file_name_for(&b));

        let underscored = MemoryEntry::from_read("poem_writer", serde_json::Value::Null, "x");
        let joined = MemoryEntry::from_read("poemwriter", serde_json::Value::Null, "x");
        assert_ne!(file_name_for(&underscored), file_name_for(&joined));
    }

    #[tokio::test]
    async fn test_same_basename_references_are_both_loaded() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileMemoryStore::new(dir.path());
        for (file, content) in [("references/a/x.md", "甲"), ("references/b/x.md", "乙")] {
            let entry = MemoryEntry::from_reference("poem_writer", file, serde_json::Value::Null, content);
            store.save(&entry).await.unwrap();
        }
        let mut contents: Vec<String> = store.load().await.unwrap().into_iter().map(|e| e.content).collect();
        contents.sort();
        assert_eq!(contents, vec!["乙".to_string(), "甲".to_string()]);
    }

    #[tokio::test]
    async fn test_save_then_load_keeps_identity_and_content() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileMemoryStore::new(dir.path());
        let entry = MemoryEntry::from_call(
            "poem_writer",
            "scripts/tool.py",
            &serde_json::json!({"theme": "春"}),
            &serde_json::json!({"lines": 4}),
        );
        store.save(&entry).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let got = &loaded[0];
        assert_eq!(got.skill, entry.skill);
        assert_eq!(got.tool_name, entry.tool_name);
        assert_eq!(got.reference, entry.reference);
        assert_eq!(got.script, entry.script);
        assert_eq!(got.content, entry.content);
    }

    #[tokio::test]
    async fn test_load_skips_invalid_and_deprecated() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileMemoryStore::new(dir.path());
        let mut old = MemoryEntry::from_read("old", serde_json::Value::Null, "x");
        old.deprecated = true;
        store.save(&old).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), "{not json").await.unwrap();
        store
            .save(&MemoryEntry::from_read("fresh", serde_json::Value::Null, "y"))
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].skill, "fresh");
    }

    #[tokio::test]
    async fn test_missing_dir_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileMemoryStore::new(dir.path().join("nope"));
        assert!(store.load().await.unwrap().is_empty());
    }
}
