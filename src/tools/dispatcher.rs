//! 工具调度：按 provider 标签把调用路由到技能提供方或外部工具服务
//!
//! 目标是封闭的一组变体（ToolTarget），不做字符串分支之外的动态查找。
//! 技能 read / readReference / call 成功时写入技能记忆；每次调用的结果或失败都转为一条对话消息，
//! 供下一次模型调用参考。队列严格串行消费，一次只有一个调用在执行。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::memory::{clip, MemoryEntry, Message, SkillMemoryPool};
use crate::react::events::{AgentEvent, EventSink};
use crate::skills::{SkillError, SkillProvider};
use crate::tools::executor::ToolExecutor;
use crate::tools::mcp::ExternalToolServer;
use crate::tools::queue::{ToolCall, ToolCallQueue};

/// 技能 provider 标签
pub const SKILL_PROVIDERS: [&str; 2] = ["openskills", "skill"];
/// 外部工具 provider 标签
pub const EXTERNAL_PROVIDER: &str = "mcp";

const RESULT_PREVIEW_CHARS: usize = 4000;

/// 技能子操作
#[derive(Debug, Clone, PartialEq)]
pub enum SkillOp {
    Read,
    ReadReference { files: Vec<String> },
    Call { script: String, params: serde_json::Value },
}

/// 调用目标
#[derive(Debug, Clone, PartialEq)]
pub enum ToolTarget {
    Skill { skill: String, op: SkillOp },
    External { name: String, args: serde_json::Value },
}

fn str_field<'a>(input: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl ToolTarget {
    /// 由 (provider, toolName, input) 解析出目标
    pub fn resolve(provider: &str, tool_name: &str, input: &serde_json::Value) -> Result<Self, AgentError> {
        if SKILL_PROVIDERS.contains(&provider) {
            let skill = str_field(input, "skill")
                .ok_or_else(|| SkillError::InvalidArgument("skill required".into()))?
                .to_string();
            let op = match tool_name {
                "read" | "load" => SkillOp::Read,
                "readReference" | "loadReference" => {
                    let files: Vec<String> = match input.get("files").and_then(|v| v.as_array()) {
                        Some(arr) => arr
                            .iter()
                            .filter_map(|f| f.as_str())
                            .map(str::to_string)
                            .collect(),
                        None => str_field(input, "file").map(|f| vec![f.to_string()]).unwrap_or_default(),
                    };
                    if files.is_empty() {
                        return Err(SkillError::InvalidArgument("file or files required".into()).into());
                    }
                    SkillOp::ReadReference { files }
                }
                "call" | "execute" => {
                    let script = str_field(input, "script")
                        .ok_or_else(|| SkillError::InvalidArgument("script required".into()))?
                        .to_string();
                    let params = input
                        .get("params")
                        .cloned()
                        .filter(|p| !p.is_null())
                        .unwrap_or_else(|| serde_json::json!({}));
                    SkillOp::Call { script, params }
                }
                other => {
                    return Err(AgentError::UnsupportedTool(format!(
                        "tool {}.{} not found",
                        provider, other
                    )))
                }
            };
            return Ok(ToolTarget::Skill { skill, op });
        }
        if provider == EXTERNAL_PROVIDER {
            return Ok(ToolTarget::External {
                name: tool_name.to_string(),
                args: input.clone(),
            });
        }
        Err(AgentError::UnsupportedTool(format!(
            "provider {} not supported",
            provider
        )))
    }
}

/// 单次调度结果：原始结果（写入 tool_update）与要追加到对话中的消息
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub result: serde_json::Value,
    pub messages: Vec<Message>,
}

/// 工具调度器
pub struct ToolDispatcher {
    skills: Arc<dyn SkillProvider>,
    external: Option<Arc<dyn ExternalToolServer>>,
    memory: Arc<SkillMemoryPool>,
    executor: ToolExecutor,
}

impl ToolDispatcher {
    pub fn new(
        skills: Arc<dyn SkillProvider>,
        external: Option<Arc<dyn ExternalToolServer>>,
        memory: Arc<SkillMemoryPool>,
        executor: ToolExecutor,
    ) -> Self {
        Self {
            skills,
            external,
            memory,
            executor,
        }
    }

    pub fn external(&self) -> Option<&Arc<dyn ExternalToolServer>> {
        self.external.as_ref()
    }

    /// 执行单个调用（带超时与审计）
    pub async fn dispatch(&self, call: &ToolCall) -> Result<DispatchOutcome, AgentError> {
        let target = ToolTarget::resolve(&call.provider, &call.tool_name, &call.input)?;
        self.executor
            .execute(&call.provider, &call.tool_name, &call.input, self.run(target))
            .await
    }

    async fn run(&self, target: ToolTarget) -> Result<DispatchOutcome, AgentError> {
        match target {
            ToolTarget::Skill { skill, op } => self.run_skill(&skill, op).await,
            ToolTarget::External { name, args } => {
                let server = self
                    .external
                    .as_ref()
                    .ok_or_else(|| AgentError::UnsupportedTool(format!("external tool {} (no server configured)", name)))?;
                let result = server.call_tool(&name, args).await?;
                let text = match &result {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok(DispatchOutcome {
                    messages: vec![Message::assistant(format!(
                        "已调用工具「{}」，结果是：\n\n{}",
                        name,
                        clip(&text, RESULT_PREVIEW_CHARS)
                    ))],
                    result,
                })
            }
        }
    }

    async fn run_skill(&self, skill: &str, op: SkillOp) -> Result<DispatchOutcome, AgentError> {
        let mut entries = Vec::new();
        let result = match op {
            SkillOp::Read => {
                let doc = self.skills.read(skill).await?;
                entries.push(MemoryEntry::from_read(&doc.key, doc.meta.clone(), doc.body.clone()));
                serde_json::json!({ "key": doc.key, "meta": doc.meta, "body": doc.body })
            }
            SkillOp::ReadReference { files } => {
                let mut extras = Vec::new();
                let mut first_err = None;
                for f in &files {
                    match self.skills.read_reference(skill, f).await {
                        Ok(r) => {
                            entries.push(MemoryEntry::from_reference(skill, &r.file, r.meta.clone(), r.content.clone()));
                            extras.push(serde_json::json!({ "file": r.file, "meta": r.meta, "content": r.content }));
                        }
                        Err(e) => {
                            tracing::warn!(skill = %skill, file = %f, error = %e, "reference read failed");
                            first_err.get_or_insert(e);
                        }
                    }
                }
                if extras.is_empty() {
                    if let Some(e) = first_err {
                        return Err(e.into());
                    }
                }
                serde_json::json!({ "key": skill, "extras": extras })
            }
            SkillOp::Call { script, params } => {
                let out = self.skills.call(skill, &script, params.clone()).await?;
                entries.push(MemoryEntry::from_call(skill, &script, &params, &out));
                out
            }
        };

        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.content.is_empty() {
                continue;
            }
            messages.push(entry.to_message());
            self.memory.record(entry).await;
        }
        Ok(DispatchOutcome { result, messages })
    }

    /// 串行消费队列直到没有 pending 调用；返回按调用顺序追加的对话消息
    ///
    /// 单个调用失败不会中断：记为 failed 并生成 `TOOL_ERROR(...)` 消息。只有取消会提前返回。
    pub async fn drain(
        &self,
        queue: &mut ToolCallQueue,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, AgentError> {
        let mut messages = Vec::new();
        while let Some(pos) = queue.next_pending() {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let Some(call) = queue.mark_running(pos).cloned() else {
                break;
            };
            events.emit(AgentEvent::tool_update(&call));
            tracing::info!(tool = %call.tool, id = %call.id, "tool call started");

            let updated = match self.dispatch(&call).await {
                Ok(outcome) => {
                    messages.extend(outcome.messages);
                    queue.mark_completed(pos, outcome.result)
                }
                Err(e) => {
                    tracing::warn!(tool = %call.tool, error = %e, "tool call failed");
                    messages.push(Message::assistant(format!(
                        "TOOL_ERROR({}.{}): {}",
                        call.provider, call.tool_name, e
                    )));
                    queue.mark_failed(pos, e.to_string())
                }
            };
            if let Some(updated) = updated {
                events.emit(AgentEvent::tool_update(updated));
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::react::protocol::ToolCallRequest;
    use crate::skills::{SkillDocument, SkillReference, SkillSummary};
    use crate::tools::queue::ToolCallStatus;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct StaticSkills;

    #[async_trait]
    impl SkillProvider for StaticSkills {
        async fn list(&self) -> Vec<SkillSummary> {
            Vec::new()
        }

        async fn read(&self, skill: &str) -> Result<SkillDocument, SkillError> {
            if skill != "poem_writer" {
                return Err(SkillError::NotFound(skill.into()));
            }
            Ok(SkillDocument {
                key: skill.into(),
                meta: serde_json::json!({"name": "poem_writer", "description": "写古诗"}),
                body: "按格律写诗".into(),
            })
        }

        async fn read_reference(&self, _skill: &str, file: &str) -> Result<SkillReference, SkillError> {
            if file.contains("missing") {
                return Err(SkillError::ReferenceNotFound(file.into()));
            }
            Ok(SkillReference {
                file: format!("references/{}", file),
                meta: serde_json::json!({}),
                content: "七言绝句".into(),
            })
        }

        async fn call(&self, _skill: &str, _script: &str, params: serde_json::Value) -> Result<serde_json::Value, SkillError> {
            Ok(params)
        }
    }

    fn dispatcher(pool: Arc<SkillMemoryPool>) -> ToolDispatcher {
        ToolDispatcher::new(Arc::new(StaticSkills), None, pool, ToolExecutor::new(5))
    }

    #[test]
    fn test_resolve_targets() {
        let t = ToolTarget::resolve("skill", "load", &serde_json::json!({"skill": "a"})).unwrap();
        assert_eq!(t, ToolTarget::Skill { skill: "a".into(), op: SkillOp::Read });

        let t = ToolTarget::resolve(
            "openskills",
            "readReference",
            &serde_json::json!({"skill": "a", "files": ["x.md", "y.md"]}),
        )
        .unwrap();
        assert!(matches!(t, ToolTarget::Skill { op: SkillOp::ReadReference { ref files }, .. } if files.len() == 2));

        let err = ToolTarget::resolve("foo", "bar", &serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("provider foo not supported"));

        assert!(ToolTarget::resolve("openskills", "read", &serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_drain_sequential_records_memory_and_reports_failures() {
        let pool = Arc::new(SkillMemoryPool::new(None));
        let d = dispatcher(pool.clone());
        let mut queue = ToolCallQueue::new();
        queue.enqueue(vec![
            ToolCallRequest::new("openskills", "read", serde_json::json!({"skill": "poem_writer"})),
            ToolCallRequest::new("openskills", "readReference", serde_json::json!({"skill": "poem_writer", "file": "qijue.md"})),
            ToolCallRequest::new("mcp", "search", serde_json::json!({})),
        ]);
        let (sink, mut rx) = EventSink::channel();
        let msgs = d.drain(&mut queue, &sink, &CancellationToken::new()).await.unwrap();

        assert_eq!(msgs.len(), 3);
        assert!(msgs[0].content.starts_with("已加载技能「poem_writer」的正文"));
        assert!(msgs[1].content.contains("references/qijue.md"));
        assert!(msgs[2].content.starts_with("TOOL_ERROR(mcp.search)"));

        let calls = queue.calls();
        assert_eq!(calls[0].status, ToolCallStatus::Completed);
        assert_eq!(calls[2].status, ToolCallStatus::Failed);
        assert!(calls[1].started_at >= calls[0].completed_at);

        assert_eq!(pool.candidates(&HashSet::new()).await.len(), 2);

        let mut updates = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, AgentEvent::ToolUpdate { .. }) {
                updates += 1;
            }
        }
        assert_eq!(updates, 6);
    }

    #[tokio::test]
    async fn test_partial_reference_failure_keeps_successes() {
        let pool = Arc::new(SkillMemoryPool::new(None));
        let d = dispatcher(pool);
        let mut queue = ToolCallQueue::new();
        queue.enqueue(vec![ToolCallRequest::new(
            "openskills",
            "readReference",
            serde_json::json!({"skill": "poem_writer", "files": ["missing.md", "qijue.md"]}),
        )]);
        let msgs = d.drain(&mut queue, &EventSink::none(), &CancellationToken::new()).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(queue.calls()[0].status, ToolCallStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let d = dispatcher(Arc::new(SkillMemoryPool::new(None)));
        let mut queue = ToolCallQueue::new();
        queue.enqueue(vec![ToolCallRequest::new("mcp", "a", serde_json::json!({}))]);
        let token = CancellationToken::new();
        token.cancel();
        let err = d.drain(&mut queue, &EventSink::none(), &token).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }
}
