//! Agent 编排器：从配置装配完整引擎
//!
//! 负责：加载配置、选择 LLM 后端、扫描技能根目录、打开会话历史与记忆文档、连接外部工具服务、
//! 读取可选的 AGENTS.md，最后交给 AgentBuilder 组装。

use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::Agent;
use crate::config::{load_config, AppConfig};
use crate::core::builder::AgentBuilder;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, DEEPSEEK_BASE_URL, QWEN_BASE_URL};
use crate::memory::{FileHistoryStore, JsonFileMemoryStore, MemoryDocumentStore, SkillMemoryPool};
use crate::skills::FsSkillProvider;
use crate::tools::{ExternalToolServer, McpHub};

/// provider 对应的默认端点与 API Key 环境变量
fn provider_defaults(provider: &str) -> (Option<&'static str>, &'static str) {
    match provider {
        "deepseek" => (Some(DEEPSEEK_BASE_URL), "DEEPSEEK_API_KEY"),
        "qwen" => (Some(QWEN_BASE_URL), "DASHSCOPE_API_KEY"),
        _ => (None, "OPENAI_API_KEY"),
    }
}

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM");
        return Arc::new(MockLlmClient::new());
    }

    let (default_base, default_key_env) = provider_defaults(&provider);
    let key_env = cfg.llm.api_key_env.as_deref().unwrap_or(default_key_env);
    let Ok(api_key) = std::env::var(key_env) else {
        tracing::warn!(provider = %provider, key_env, "API key not set, using Mock LLM");
        return Arc::new(MockLlmClient::new());
    };
    let base_url = cfg.llm.base_url.as_deref().or(default_base);
    tracing::info!(provider = %provider, model = %cfg.llm.model, "Using OpenAI-compatible LLM");
    Arc::new(OpenAiClient::new(base_url, &cfg.llm.model, Some(&api_key)))
}

/// AGENTS.md：配置路径优先，其次当前目录
fn read_agents_prompt(cfg: &AppConfig) -> Option<String> {
    let candidates = cfg
        .app
        .system_prompt_path
        .iter()
        .cloned()
        .chain(std::iter::once(PathBuf::from("AGENTS.md")));
    for path in candidates {
        if let Ok(text) = std::fs::read_to_string(&path) {
            tracing::info!(path = %path.display(), "AGENTS.md loaded");
            return Some(text);
        }
    }
    None
}

/// 创建 Agent：加载配置并装配所有组件
pub async fn create_agent(config_path: Option<PathBuf>) -> anyhow::Result<Agent> {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    build_agent(&cfg).await
}

/// 按给定配置装配 Agent
pub async fn build_agent(cfg: &AppConfig) -> anyhow::Result<Agent> {
    let llm = create_llm_from_config(cfg);
    let skills = Arc::new(FsSkillProvider::new(cfg.skills.roots.iter()));
    let history = Arc::new(FileHistoryStore::new(cfg.sessions_dir()));

    let store: Option<Arc<dyn MemoryDocumentStore>> = cfg
        .memory
        .persist
        .then(|| Arc::new(JsonFileMemoryStore::new(cfg.documents_dir())) as Arc<dyn MemoryDocumentStore>);
    let skill_memory = Arc::new(SkillMemoryPool::new(store));
    match skill_memory.load_from_store().await {
        Ok(n) => tracing::info!(entries = n, "skill memories loaded"),
        Err(e) => tracing::warn!(error = %e, "skill memory load failed, starting empty"),
    }

    let hub = McpHub::connect_all(
        cfg.mcp
            .servers
            .iter()
            .map(|(name, s)| (name, &s.command, s.args.as_slice())),
    )
    .await;
    let external = (!hub.is_empty()).then(|| Arc::new(hub) as Arc<dyn ExternalToolServer>);

    Ok(AgentBuilder::new(llm)
        .with_config(cfg)
        .with_skills(skills)
        .with_history(history)
        .with_external(external)
        .with_skill_memory(skill_memory)
        .with_agents_prompt(read_agents_prompt(cfg))
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        assert_eq!(provider_defaults("deepseek").1, "DEEPSEEK_API_KEY");
        assert_eq!(provider_defaults("qwen").0, Some(QWEN_BASE_URL));
        assert_eq!(provider_defaults("openai"), (None, "OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_build_agent_with_mock_and_temp_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.app.data_dir = dir.path().to_path_buf();
        cfg.skills.roots = vec![dir.path().join("skills")];
        let agent = build_agent(&cfg).await.unwrap();
        assert!(agent
            .skill_memory()
            .candidates(&std::collections::HashSet::new())
            .await
            .is_empty());
        assert_eq!(agent.settings().max_task_steps, 12);
    }
}
