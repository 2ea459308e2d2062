//! 文件系统技能提供方
//!
//! 按配置的根目录顺序查找 `<root>/<key>/SKILL.md`，同名技能以先出现的根目录为准。
//! 参考文件只能读取技能目录内的路径；脚本按扩展名选择解释器，入参 JSON 走 stdin，stdout 解析为 JSON（失败则按字符串返回）。

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::skills::provider::{
    normalize_reference_path, validate_script_path, SkillDocument, SkillError, SkillProvider,
    SkillReference, SkillSummary,
};

const SKILL_FILE: &str = "SKILL.md";

/// 技能 key：小写，空白转 `-`
pub fn sanitize_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// 解析 `---` 包裹的 frontmatter（`key: value` 逐行），返回 (meta, body)
pub fn parse_frontmatter(md: &str) -> (serde_json::Value, String) {
    let mut lines = md.lines();
    if lines.next().map(str::trim) != Some("---") {
        return (serde_json::json!({}), md.to_string());
    }
    let mut meta = serde_json::Map::new();
    let mut closed = false;
    let mut body = Vec::new();
    for line in lines {
        if closed {
            body.push(line);
            continue;
        }
        if line.trim() == "---" {
            closed = true;
            continue;
        }
        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            if !k.is_empty() {
                let v = v.trim();
                let v = v.strip_prefix('"').unwrap_or(v);
                let v = v.strip_suffix('"').unwrap_or(v);
                meta.insert(k.to_string(), serde_json::Value::String(v.to_string()));
            }
        }
    }
    (serde_json::Value::Object(meta), body.join("\n"))
}

/// 拼接技能目录内的相对路径；绝对路径或包含 `..` 的路径返回 None
fn safe_join(base: &Path, rel: &str) -> Option<PathBuf> {
    let rel = Path::new(rel.trim());
    if rel.as_os_str().is_empty() {
        return None;
    }
    if rel.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
        return None;
    }
    Some(base.join(rel))
}

fn interpreter_for(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("py") => Some("python3"),
        Some("js") | Some("mjs") => Some("node"),
        Some("sh") => Some("sh"),
        _ => None,
    }
}

/// 文件系统技能提供方
#[derive(Debug, Clone)]
pub struct FsSkillProvider {
    roots: Vec<PathBuf>,
}

impl FsSkillProvider {
    pub fn new<P: AsRef<Path>>(roots: impl IntoIterator<Item = P>) -> Self {
        Self {
            roots: roots.into_iter().map(|r| r.as_ref().to_path_buf()).collect(),
        }
    }

    async fn resolve_dir(&self, skill: &str) -> Result<PathBuf, SkillError> {
        let key = sanitize_key(skill);
        if key.is_empty() {
            return Err(SkillError::InvalidArgument("skill name required".into()));
        }
        if key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(SkillError::InvalidPath(key));
        }
        for root in &self.roots {
            if let Some(dir) = find_skill_dir(root, &key).await {
                return Ok(dir);
            }
        }
        Err(SkillError::NotFound(key))
    }
}

/// 在单个根目录下找 key 对应的技能目录：目录名本身等于 key，或目录名规范化后等于 key
async fn find_skill_dir(root: &Path, key: &str) -> Option<PathBuf> {
    let exact = root.join(key);
    if tokio::fs::try_exists(exact.join(SKILL_FILE)).await.unwrap_or(false) {
        return Some(exact);
    }
    let mut rd = tokio::fs::read_dir(root).await.ok()?;
    let mut matched: Vec<PathBuf> = Vec::new();
    while let Ok(Some(dirent)) = rd.next_entry().await {
        let name = dirent.file_name().to_string_lossy().to_string();
        let path = dirent.path();
        if sanitize_key(&name) == key
            && tokio::fs::try_exists(path.join(SKILL_FILE)).await.unwrap_or(false)
        {
            matched.push(path);
        }
    }
    // read_dir 顺序不确定，多个候选时取目录名最小的
    matched.sort();
    matched.into_iter().next()
}

#[async_trait]
impl SkillProvider for FsSkillProvider {
    async fn list(&self) -> Vec<SkillSummary> {
        let mut out: Vec<SkillSummary> = Vec::new();
        for root in &self.roots {
            let Ok(mut rd) = tokio::fs::read_dir(root).await else {
                continue;
            };
            let mut found = Vec::new();
            while let Ok(Some(dirent)) = rd.next_entry().await {
                let path = dirent.path();
                let Ok(md) = tokio::fs::read_to_string(path.join(SKILL_FILE)).await else {
                    continue;
                };
                let dir_name = dirent.file_name().to_string_lossy().to_string();
                let key = sanitize_key(&dir_name);
                if out.iter().chain(found.iter()).any(|s: &SkillSummary| s.key == key) {
                    continue;
                }
                let (meta, _) = parse_frontmatter(&md);
                let field = |k: &str| meta.get(k).and_then(|v| v.as_str()).map(str::to_string);
                found.push(SkillSummary {
                    name: field("name").unwrap_or_else(|| key.clone()),
                    description: field("description").unwrap_or_default(),
                    key,
                });
            }
            found.sort_by(|a, b| a.key.cmp(&b.key));
            out.extend(found);
        }
        out
    }

    async fn read(&self, skill: &str) -> Result<SkillDocument, SkillError> {
        let dir = self.resolve_dir(skill).await?;
        let md = tokio::fs::read_to_string(dir.join(SKILL_FILE)).await?;
        let (meta, body) = parse_frontmatter(&md);
        Ok(SkillDocument {
            key: sanitize_key(skill),
            meta,
            body,
        })
    }

    async fn read_reference(&self, skill: &str, file: &str) -> Result<SkillReference, SkillError> {
        if file.trim().is_empty() {
            return Err(SkillError::InvalidArgument("reference file required".into()));
        }
        let rel = normalize_reference_path(file);
        let dir = self.resolve_dir(skill).await?;
        let path = safe_join(&dir, &rel).ok_or_else(|| SkillError::InvalidPath(rel.clone()))?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SkillError::ReferenceNotFound(rel))
            }
            Err(e) => return Err(e.into()),
        };
        let (meta, content) = parse_frontmatter(&text);
        Ok(SkillReference {
            file: rel,
            meta,
            content,
        })
    }

    async fn call(
        &self,
        skill: &str,
        script: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, SkillError> {
        let script = validate_script_path(script)?;
        let dir = self.resolve_dir(skill).await?;
        let path = safe_join(&dir, script).ok_or_else(|| SkillError::InvalidPath(script.into()))?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(SkillError::NotFound(format!("script {}", script)));
        }

        let mut cmd = match interpreter_for(&path) {
            Some(bin) => {
                let mut c = tokio::process::Command::new(bin);
                c.arg(&path);
                c
            }
            None => tokio::process::Command::new(&path),
        };
        let mut child = cmd
            .current_dir(&dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SkillError::ScriptFailed(format!("{}: {}", script, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(params.to_string().as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SkillError::ScriptFailed(format!(
                "{} exited with {}: {}",
                script,
                output.status,
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(serde_json::from_str(&stdout).unwrap_or(serde_json::Value::String(stdout)))
    }
}
