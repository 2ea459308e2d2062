//! 技能提供方接口
//!
//! 技能 = SKILL.md 正文 + 可选 references/ 参考文件 + 可选 scripts/ 小脚本。
//! 引擎只通过 SkillProvider 访问技能内容，不关心技能存放在哪里。

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// 技能列表项（用于 system prompt 中的技能清单）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillSummary {
    pub key: String,
    pub name: String,
    pub description: String,
}

/// 技能正文
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillDocument {
    pub key: String,
    /// frontmatter 键值（JSON 对象）
    pub meta: serde_json::Value,
    pub body: String,
}

/// 技能参考文件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillReference {
    /// 相对技能目录的路径，如 `references/qijue.md`
    pub file: String,
    pub meta: serde_json::Value,
    pub content: String,
}

#[derive(Error, Debug)]
pub enum SkillError {
    #[error("skill not found: {0}")]
    NotFound(String),

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("script failed: {0}")]
    ScriptFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 技能提供方
#[async_trait]
pub trait SkillProvider: Send + Sync {
    /// 全部可用技能
    async fn list(&self) -> Vec<SkillSummary>;

    async fn read(&self, skill: &str) -> Result<SkillDocument, SkillError>;

    /// file 不带 `references/` 前缀时自动补上
    async fn read_reference(&self, skill: &str, file: &str) -> Result<SkillReference, SkillError>;

    /// 执行 `scripts/` 下的脚本；params 为 JSON 对象
    async fn call(
        &self,
        skill: &str,
        script: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, SkillError>;
}

/// 参考文件路径规范化：补 `references/` 前缀
pub fn normalize_reference_path(file: &str) -> String {
    let raw = file.trim();
    if raw.starts_with("references/") || raw.starts_with("reference/") {
        raw.to_string()
    } else {
        format!("references/{}", raw)
    }
}

/// 脚本路径校验：必须位于 `scripts/` 下且不含 `..`
pub fn validate_script_path(script: &str) -> Result<&str, SkillError> {
    let script = script.trim();
    if script.is_empty() {
        return Err(SkillError::InvalidArgument("script path required".into()));
    }
    if !script.starts_with("scripts/") {
        return Err(SkillError::InvalidPath(format!(
            "script path must start with scripts/: {}",
            script
        )));
    }
    if script.contains("..") {
        return Err(SkillError::InvalidPath(script.to_string()));
    }
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_prefix() {
        assert_eq!(normalize_reference_path("qijue.md"), "references/qijue.md");
        assert_eq!(normalize_reference_path(" references/a.md"), "references/a.md");
    }

    #[test]
    fn test_script_path_rules() {
        assert!(validate_script_path("scripts/count.py").is_ok());
        assert!(validate_script_path("count.py").is_err());
        assert!(validate_script_path("scripts/../../etc/passwd").is_err());
        assert!(validate_script_path("").is_err());
    }
}
