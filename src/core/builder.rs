//! Agent 构建器：统一的 Agent 初始化逻辑
//!
//! CLI 与测试共用同一套装配：LLM、技能来源、会话历史、外部工具、两类记忆与选择器。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent::{Agent, EngineSettings};
use crate::config::AppConfig;
use crate::llm::LlmClient;
use crate::memory::{
    InMemoryHistoryStore, MemorySelector, SessionHistoryStore, SkillMemoryPool, TaskMemoryStore,
};
use crate::react::{ContextBuilder, Finalizer, TaskPlanner};
use crate::skills::{FsSkillProvider, SkillProvider};
use crate::tools::{ExternalToolServer, ToolDispatcher, ToolExecutor};

/// Agent 构建器：统一配置和初始化 Agent 的各个组件
pub struct AgentBuilder {
    llm: Arc<dyn LlmClient>,
    skills: Arc<dyn SkillProvider>,
    history: Arc<dyn SessionHistoryStore>,
    external: Option<Arc<dyn ExternalToolServer>>,
    skill_memory: Arc<SkillMemoryPool>,
    task_memory: Arc<TaskMemoryStore>,
    agents_prompt: Option<String>,
    settings: EngineSettings,
    recent_user_turns: usize,
    skill_limit: usize,
    task_limit: usize,
    candidate_multiplier: usize,
    tool_timeout_secs: u64,
    memory_selection: bool,
}

impl AgentBuilder {
    /// 创建新的构建器；默认无技能、内存历史、无外部工具
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            skills: Arc::new(FsSkillProvider::new(Vec::<std::path::PathBuf>::new())),
            history: Arc::new(InMemoryHistoryStore::new()),
            external: None,
            skill_memory: Arc::new(SkillMemoryPool::new(None)),
            task_memory: Arc::new(TaskMemoryStore::new()),
            agents_prompt: None,
            settings: EngineSettings::default(),
            recent_user_turns: 10,
            skill_limit: 5,
            task_limit: 3,
            candidate_multiplier: 2,
            tool_timeout_secs: 30,
            memory_selection: true,
        }
    }

    /// 套用配置中的引擎、记忆与工具参数
    pub fn with_config(mut self, cfg: &AppConfig) -> Self {
        self.settings = EngineSettings {
            max_task_steps: cfg.engine.max_task_steps,
            followup_rounds: cfg.engine.followup_rounds,
            history_max_turns: cfg.app.history_max_turns,
        };
        self.recent_user_turns = cfg.engine.recent_user_turns;
        self.skill_limit = cfg.memory.skill_limit;
        self.task_limit = cfg.memory.task_limit;
        self.candidate_multiplier = cfg.memory.candidate_multiplier;
        self.tool_timeout_secs = cfg.tools.tool_timeout_secs;
        self
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillProvider>) -> Self {
        self.skills = skills;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn SessionHistoryStore>) -> Self {
        self.history = history;
        self
    }

    pub fn with_external(mut self, external: Option<Arc<dyn ExternalToolServer>>) -> Self {
        self.external = external;
        self
    }

    pub fn with_skill_memory(mut self, pool: Arc<SkillMemoryPool>) -> Self {
        self.skill_memory = pool;
        self
    }

    pub fn with_task_memory(mut self, store: Arc<TaskMemoryStore>) -> Self {
        self.task_memory = store;
        self
    }

    /// AGENTS.md 覆盖文本
    pub fn with_agents_prompt(mut self, prompt: Option<String>) -> Self {
        self.agents_prompt = prompt;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 关闭后记忆选择不调用模型，直接取候选池末尾
    pub fn with_memory_selection(mut self, enable: bool) -> Self {
        self.memory_selection = enable;
        self
    }

    fn selector(&self, limit: usize) -> MemorySelector {
        let llm = self.memory_selection.then(|| self.llm.clone());
        MemorySelector::new(llm, limit, self.candidate_multiplier)
    }

    pub fn build(self) -> Agent {
        let context = ContextBuilder::new(
            self.skills.clone(),
            self.skill_memory.clone(),
            self.task_memory.clone(),
            self.selector(self.skill_limit),
            self.selector(self.task_limit),
        )
        .with_agents_prompt(self.agents_prompt.clone())
        .with_recent_user_turns(self.recent_user_turns);

        let dispatcher = ToolDispatcher::new(
            self.skills.clone(),
            self.external.clone(),
            self.skill_memory.clone(),
            ToolExecutor::new(self.tool_timeout_secs),
        );

        Agent {
            planner: TaskPlanner::new(self.llm.clone()),
            finalizer: Finalizer::new(
                self.llm.clone(),
                self.history.clone(),
                self.settings.history_max_turns,
            ),
            llm: self.llm,
            history: self.history,
            context,
            dispatcher,
            skill_memory: self.skill_memory,
            task_memory: self.task_memory,
            settings: self.settings,
            session_locks: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_with_config_copies_engine_settings() {
        let mut cfg = AppConfig::default();
        cfg.engine.max_task_steps = 3;
        cfg.engine.followup_rounds = 2;
        cfg.app.history_max_turns = 4;
        let agent = AgentBuilder::new(Arc::new(MockLlmClient::new()))
            .with_config(&cfg)
            .build();
        assert_eq!(agent.settings().max_task_steps, 3);
        assert_eq!(agent.settings().followup_rounds, 2);
        assert_eq!(agent.settings().history_max_turns, 4);
    }
}
