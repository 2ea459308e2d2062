//! 技能系统
//!
//! 技能（Skill）是一份指导正文加上可选的参考文件与小脚本，由模型按需加载。
//!
//! 目录结构：
//! ```text
//! skills/
//! ├── poem_writer/
//! │   ├── SKILL.md          # frontmatter（name / description）+ 正文
//! │   ├── references/       # 参考文件（readReference）
//! │   └── scripts/          # 脚本（call），入参 JSON 走 stdin
//! └── ...
//! ```

mod loader;
mod provider;

pub use loader::{parse_frontmatter, sanitize_key, FsSkillProvider};
pub use provider::{
    normalize_reference_path, validate_script_path, SkillDocument, SkillError, SkillProvider,
    SkillReference, SkillSummary,
};
