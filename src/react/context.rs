//! 上下文构建：system prompt + 会话历史 + 按需注入的记忆
//!
//! 基础上下文 = [system, ...历史, ...选中的技能记忆]。注入过的记忆 key 记入 injected 集合，
//! 同一请求后续的技能记忆选择会排除这些 key；子任务结果记忆不做这种去重。

use std::collections::HashSet;
use std::sync::Arc;

use crate::memory::{
    recent_user_inputs, MemoryKey, MemorySelector, Message, Selectable, SkillMemoryPool,
    TaskMemoryStore,
};
use crate::react::events::{AgentEvent, EventSink, MemoryUsage};
use crate::react::protocol::{FINAL_MARKER, TOOL_CALL_MARKER};
use crate::skills::{SkillProvider, SkillSummary};
use crate::tools::tool_call_schema_json;

/// 一次请求的基础上下文
#[derive(Debug, Clone, Default)]
pub struct BaseContext {
    pub messages: Vec<Message>,
    /// 本次请求已注入的技能记忆
    pub injected: HashSet<MemoryKey>,
    /// 记忆检索用的问题（最近若干条用户输入 + 本次输入）
    pub queries: Vec<String>,
}

/// 组装 `<skills_system>` 提示词
pub fn render_skills_system(skills: &[SkillSummary]) -> String {
    let items = skills
        .iter()
        .map(|s| {
            format!(
                "<skill>\n<name>{}</name>\n<description>{}</description>\n<location>project</location>\n</skill>",
                s.key.trim(),
                s.description.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let usage = [
        "When users ask you to perform tasks, check the list in <available_skills> and decide whether a skill applies.".to_string(),
        String::new(),
        "How to use skills:".to_string(),
        "- Load the skill's SKILL.md content into your working context when needed".to_string(),
        "- If necessary, load supporting documents from references/<file>".to_string(),
        "- Run a helper script from scripts/<file> with JSON params when the skill says so".to_string(),
        "- Load only what is necessary; avoid redundant or bulk loading".to_string(),
        String::new(),
        "Invocation format:".to_string(),
        format!(r#"- Single call: {} [{{"provider":"openskills","tool":"read","input":{{"skill":"<skill-name>"}}}}]"#, TOOL_CALL_MARKER),
        format!(r#"- Load reference: {} [{{"provider":"openskills","tool":"readReference","input":{{"skill":"<skill-name>","file":"references/<file>"}}}}]"#, TOOL_CALL_MARKER),
        format!(r#"- Run script: {} [{{"provider":"openskills","tool":"call","input":{{"skill":"<skill-name>","script":"scripts/<file>","params":{{}}}}}}]"#, TOOL_CALL_MARKER),
        format!(r#"- External tool: {} [{{"provider":"mcp","tool":"<tool-name>","input":{{...}}}}]"#, TOOL_CALL_MARKER),
        "- Batch calls: put several objects in the same array; they run in order".to_string(),
        format!("- When you have the answer, reply with: {} <answer>", FINAL_MARKER),
        String::new(),
        "Each array element follows this JSON Schema:".to_string(),
        tool_call_schema_json(),
        String::new(),
        "Usage notes:".to_string(),
        "- Only use skills listed in <available_skills>".to_string(),
        "- Do not call or invent skills that are not listed".to_string(),
        "- Do not reload a skill that is already present in context".to_string(),
    ]
    .join("\n");
    [
        "<skills_system priority=\"1\">",
        "",
        "## Available Skills",
        "",
        "<usage>",
        &usage,
        "</usage>",
        "",
        "<available_skills>",
        &items,
        "</available_skills>",
        "",
        "</skills_system>",
    ]
    .join("\n")
}

/// 上下文构建器
pub struct ContextBuilder {
    skills: Arc<dyn SkillProvider>,
    skill_memory: Arc<SkillMemoryPool>,
    task_memory: Arc<TaskMemoryStore>,
    skill_selector: MemorySelector,
    task_selector: MemorySelector,
    agents_prompt: Option<String>,
    recent_user_turns: usize,
}

impl ContextBuilder {
    pub fn new(
        skills: Arc<dyn SkillProvider>,
        skill_memory: Arc<SkillMemoryPool>,
        task_memory: Arc<TaskMemoryStore>,
        skill_selector: MemorySelector,
        task_selector: MemorySelector,
    ) -> Self {
        Self {
            skills,
            skill_memory,
            task_memory,
            skill_selector,
            task_selector,
            agents_prompt: None,
            recent_user_turns: 10,
        }
    }

    /// AGENTS.md 覆盖：只有包含 `<skills_system` 时才生效
    pub fn with_agents_prompt(mut self, prompt: Option<String>) -> Self {
        self.agents_prompt = prompt.filter(|p| p.contains("<skills_system"));
        self
    }

    pub fn with_recent_user_turns(mut self, n: usize) -> Self {
        self.recent_user_turns = n;
        self
    }

    pub async fn system_prompt(&self) -> String {
        if let Some(p) = &self.agents_prompt {
            return p.clone();
        }
        render_skills_system(&self.skills.list().await)
    }

    /// 构建基础上下文，并注入首批技能记忆
    pub async fn build(&self, user_input: &str, history: &[Message], events: &EventSink) -> BaseContext {
        let mut queries = recent_user_inputs(history, self.recent_user_turns);
        queries.push(user_input.to_string());

        let mut messages = vec![Message::system(self.system_prompt().await)];
        messages.extend(history.iter().cloned());

        let mut injected = HashSet::new();
        let memories = self.inject_skill_memories(&queries, &mut injected, events).await;
        messages.extend(memories);
        tracing::debug!(messages = messages.len(), injected = injected.len(), "base context built");

        BaseContext {
            messages,
            injected,
            queries,
        }
    }

    /// 选择未注入过的技能记忆，登记到 injected，返回要追加的消息
    pub async fn inject_skill_memories(
        &self,
        queries: &[String],
        injected: &mut HashSet<MemoryKey>,
        events: &EventSink,
    ) -> Vec<Message> {
        let candidates = self.skill_memory.candidates(injected).await;
        let selected = self.skill_selector.select(queries, &candidates, events).await;
        if selected.is_empty() {
            return Vec::new();
        }
        events.emit(AgentEvent::MemoryUsed {
            memories: selected
                .iter()
                .map(|m| MemoryUsage {
                    source: "skill".to_string(),
                    label: format!("{}.{}", m.skill, m.tool_name.as_str()),
                    snippet: m.snippet.clone(),
                })
                .collect(),
        });
        selected
            .into_iter()
            .map(|m| {
                injected.insert(m.key());
                m.to_message()
            })
            .collect()
    }

    /// 选择该会话的子任务结果记忆
    pub async fn inject_task_memories(
        &self,
        session_id: &str,
        queries: &[String],
        events: &EventSink,
    ) -> Vec<Message> {
        let candidates = self.task_memory.all(session_id).await;
        let selected = self.task_selector.select(queries, &candidates, events).await;
        if selected.is_empty() {
            return Vec::new();
        }
        events.emit(AgentEvent::MemoryUsed {
            memories: selected
                .iter()
                .map(|m| MemoryUsage {
                    source: "task".to_string(),
                    label: m.title.clone(),
                    snippet: m.selection_line(),
                })
                .collect(),
        });
        selected.iter().map(|m| m.to_message()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEntry, TaskResultMemory};
    use crate::skills::{SkillDocument, SkillError, SkillReference};
    use async_trait::async_trait;

    struct OneSkill;

    #[async_trait]
    impl SkillProvider for OneSkill {
        async fn list(&self) -> Vec<SkillSummary> {
            vec![SkillSummary {
                key: "poem_writer".into(),
                name: "poem_writer".into(),
                description: "写古诗".into(),
            }]
        }
        async fn read(&self, s: &str) -> Result<SkillDocument, SkillError> {
            Err(SkillError::NotFound(s.into()))
        }
        async fn read_reference(&self, s: &str, _f: &str) -> Result<SkillReference, SkillError> {
            Err(SkillError::NotFound(s.into()))
        }
        async fn call(&self, s: &str, _: &str, _: serde_json::Value) -> Result<serde_json::Value, SkillError> {
            Err(SkillError::NotFound(s.into()))
        }
    }

    fn builder(pool: Arc<SkillMemoryPool>, tasks: Arc<TaskMemoryStore>) -> ContextBuilder {
        ContextBuilder::new(
            Arc::new(OneSkill),
            pool,
            tasks,
            MemorySelector::new(None, 5, 2),
            MemorySelector::new(None, 3, 2),
        )
    }

    #[test]
    fn test_skills_system_lists_skills() {
        let xml = render_skills_system(&[SkillSummary {
            key: "poem_writer".into(),
            name: "Poem".into(),
            description: "写古诗".into(),
        }]);
        assert!(xml.starts_with("<skills_system"));
        assert!(xml.contains("<name>poem_writer</name>"));
        assert!(xml.contains("CALL_JSONS:"));
        assert!(xml.contains("FINAL:"));
    }

    #[tokio::test]
    async fn test_agents_prompt_only_when_valid() {
        let pool = Arc::new(SkillMemoryPool::new(None));
        let tasks = Arc::new(TaskMemoryStore::new());
        let b = builder(pool.clone(), tasks.clone()).with_agents_prompt(Some("随便写点".into()));
        assert!(b.system_prompt().await.contains("<available_skills>"));

        let b = builder(pool, tasks).with_agents_prompt(Some("<skills_system>自定义</skills_system>".into()));
        assert_eq!(b.system_prompt().await, "<skills_system>自定义</skills_system>");
    }

    #[tokio::test]
    async fn test_build_injects_once_per_request() {
        let pool = Arc::new(SkillMemoryPool::new(None));
        pool.record(MemoryEntry::from_read("poem_writer", serde_json::Value::Null, "正文")).await;
        let b = builder(pool, Arc::new(TaskMemoryStore::new()));
        let (sink, mut rx) = EventSink::channel();

        let mut ctx = b.build("写诗", &[Message::user("之前"), Message::assistant("好")], &sink).await;
        assert_eq!(ctx.queries, vec!["之前", "写诗"]);
        assert_eq!(ctx.messages.len(), 4);
        assert_eq!(ctx.injected.len(), 1);
        assert!(matches!(rx.try_recv(), Ok(AgentEvent::MemoryUsed { .. })));

        let again = b.inject_skill_memories(&ctx.queries, &mut ctx.injected, &sink).await;
        assert!(again.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_task_memories_scoped_to_session() {
        let tasks = Arc::new(TaskMemoryStore::new());
        tasks.append("s1", TaskResultMemory::new(0, "取数据", "", "42")).await;
        let b = builder(Arc::new(SkillMemoryPool::new(None)), tasks);
        let q = vec!["q".to_string()];
        assert_eq!(b.inject_task_memories("s1", &q, &EventSink::none()).await.len(), 1);
        assert!(b.inject_task_memories("s2", &q, &EventSink::none()).await.is_empty());
    }
}
