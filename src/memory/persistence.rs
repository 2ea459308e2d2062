//! 会话历史持久化
//!
//! 每个会话一个 JSON 文件（<dir>/<session_id>.json），内容为 role + content 数组，
//! 用于进程重启后恢复对话上下文。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::memory::history::{merge_segments, SessionHistoryStore};
use crate::memory::Message;

/// 文件持久化会话历史：写操作串行化，避免同一文件并发覆盖
#[derive(Debug)]
pub struct FileHistoryStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileHistoryStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// session_id 只保留字母数字、`-`、`_`，防止路径逃逸
    fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let safe = if safe.is_empty() { "default".to_string() } else { safe };
        self.dir.join(format!("{}.json", safe))
    }

    async fn load(&self, path: &Path) -> anyhow::Result<Vec<Message>> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionHistoryStore for FileHistoryStore {
    async fn get(&self, session_id: &str) -> anyhow::Result<Vec<Message>> {
        self.load(&self.path_for(session_id)).await
    }

    async fn append(
        &self,
        session_id: &str,
        segments: Vec<Message>,
        max_turns: usize,
    ) -> anyhow::Result<Vec<Message>> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(session_id);
        let prev = self.load(&path).await?;
        let next = merge_segments(prev, segments, max_turns);
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, serde_json::to_string_pretty(&next)?).await?;
        Ok(next)
    }

    async fn clear(&self, session_id: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let store = FileHistoryStore::new(dir.path());
        store
            .append("s-1", vec![Message::user("写诗"), Message::assistant("好")], 12)
            .await
            .unwrap();

        let reopened = FileHistoryStore::new(dir.path());
        let history = reopened.get("s-1").await.unwrap();
        assert_eq!(history, vec![Message::user("写诗"), Message::assistant("好")]);
    }

    #[tokio::test]
    async fn test_session_id_cannot_escape_dir() {
        let dir = TempDir::new().unwrap();
        let store = FileHistoryStore::new(dir.path());
        store
            .append("../evil", vec![Message::user("x")], 12)
            .await
            .unwrap();
        assert!(dir.path().join("___evil.json").exists());
    }
}
