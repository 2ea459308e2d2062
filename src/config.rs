//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PM__*` 覆盖（双下划线表示嵌套，如 `PM__LLM__PROVIDER=mock`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub engine: EngineSection,
    pub memory: MemorySection,
    pub skills: SkillsSection,
    pub tools: ToolsSection,
    pub mcp: McpSection,
}

/// [app] 段：应用名、数据目录、会话历史轮数、AGENTS.md 覆盖
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话历史、记忆文档的根目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 会话历史保留轮数（每轮 user + assistant 两条）
    #[serde(default = "default_history_max_turns")]
    pub history_max_turns: usize,
    /// 可选的 AGENTS.md；仅当其中包含 `<skills_system` 时替换内置的技能提示词
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: default_data_dir(),
            history_max_turns: default_history_max_turns(),
            system_prompt_path: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_history_max_turns() -> usize {
    12
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / deepseek / qwen / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名；未设置时按 provider 推断
    pub api_key_env: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: None,
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

/// [engine] 段：推理步数、追加轮次、记忆检索使用的历史条数
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// 单个子任务最多模型调用次数
    #[serde(default = "default_max_task_steps")]
    pub max_task_steps: usize,
    /// 汇总前最多追加规划几轮；0 为单轮
    #[serde(default)]
    pub followup_rounds: usize,
    #[serde(default = "default_recent_user_turns")]
    pub recent_user_turns: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_task_steps: default_max_task_steps(),
            followup_rounds: 0,
            recent_user_turns: default_recent_user_turns(),
        }
    }
}

fn default_max_task_steps() -> usize {
    12
}

fn default_recent_user_turns() -> usize {
    10
}

/// [memory] 段：两类记忆的选择条数与候选池倍数、是否落盘
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_skill_limit")]
    pub skill_limit: usize,
    #[serde(default = "default_task_limit")]
    pub task_limit: usize,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_true")]
    pub persist: bool,
    /// 记忆文档目录，未设置时为 `<data_dir>/memories`
    pub documents_dir: Option<PathBuf>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            skill_limit: default_skill_limit(),
            task_limit: default_task_limit(),
            candidate_multiplier: default_candidate_multiplier(),
            persist: true,
            documents_dir: None,
        }
    }
}

fn default_skill_limit() -> usize {
    5
}

fn default_task_limit() -> usize {
    3
}

fn default_candidate_multiplier() -> usize {
    2
}

fn default_true() -> bool {
    true
}

/// [skills] 段：技能根目录（按顺序查找，同名技能先到先得）
#[derive(Debug, Clone, Deserialize)]
pub struct SkillsSection {
    #[serde(default = "default_skill_roots")]
    pub roots: Vec<PathBuf>,
}

impl Default for SkillsSection {
    fn default() -> Self {
        Self {
            roots: default_skill_roots(),
        }
    }
}

fn default_skill_roots() -> Vec<PathBuf> {
    vec![
        PathBuf::from("skills"),
        PathBuf::from(".agent/skills"),
        PathBuf::from(".claude/skills"),
    ]
}

/// [tools] 段：工具调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [mcp.servers.<name>] 段：外部工具服务（stdio 子进程）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct McpSection {
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl AppConfig {
    /// 记忆文档目录
    pub fn documents_dir(&self) -> PathBuf {
        self.memory
            .documents_dir
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("memories"))
    }

    /// 会话历史目录
    pub fn sessions_dir(&self) -> PathBuf {
        self.app.data_dir.join("sessions")
    }
}

/// 从 config 目录加载配置，环境变量 PM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
