//! 请求执行引擎
//!
//! 单次请求：读取会话历史 -> 构建基础上下文（注入技能记忆）-> 规划子任务 ->
//! 按列表顺序逐个执行子任务（每个子任务独立的推理循环与工具队列）-> 可选追加规划 -> 汇总回答。
//! 每一步状态变化都发出 AgentEvent；失败时发出终止的 error 事件。
//! 同一 session 的请求由会话锁串行化；不同 session 可并发。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::task::Task;
use crate::core::{AgentError, TaskScheduler};
use crate::llm::LlmClient;
use crate::memory::{Message, SessionHistoryStore, SkillMemoryPool, TaskMemoryStore, TaskResultMemory};
use crate::react::{AgentEvent, BaseContext, ContextBuilder, EventSink, Finalizer, TaskLoop, TaskPlanner};
use crate::tools::{ToolDispatcher, ToolSpec};

/// 引擎运行参数
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_task_steps: usize,
    pub followup_rounds: usize,
    pub history_max_turns: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_task_steps: 12,
            followup_rounds: 0,
            history_max_turns: 12,
        }
    }
}

/// 对话任务执行引擎（多会话共享）
pub struct Agent {
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) history: Arc<dyn SessionHistoryStore>,
    pub(crate) context: ContextBuilder,
    pub(crate) planner: TaskPlanner,
    pub(crate) dispatcher: ToolDispatcher,
    pub(crate) finalizer: Finalizer,
    pub(crate) skill_memory: Arc<SkillMemoryPool>,
    pub(crate) task_memory: Arc<TaskMemoryStore>,
    pub(crate) settings: EngineSettings,
    pub(crate) session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// 单次请求的不可变参数
struct RequestScope<'a> {
    session_id: &'a str,
    user_input: &'a str,
    tools: &'a [ToolSpec],
    events: &'a EventSink,
    cancel: &'a CancellationToken,
}

impl Agent {
    pub fn history(&self) -> &Arc<dyn SessionHistoryStore> {
        &self.history
    }

    pub fn skill_memory(&self) -> &Arc<SkillMemoryPool> {
        &self.skill_memory
    }

    pub fn task_memory(&self) -> &Arc<TaskMemoryStore> {
        &self.task_memory
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// 执行一次请求，返回最终回答；成功时最后一个事件为 done，失败时为 error
    pub async fn run_request(
        &self,
        session_id: &str,
        user_input: &str,
        events: EventSink,
        cancel: Option<CancellationToken>,
    ) -> Result<String, AgentError> {
        let lock = self.session_lock(session_id).await;
        let cancel = cancel.unwrap_or_default();

        let result = {
            let _guard = lock.lock().await;
            tracing::info!(session = %session_id, "request started");
            self.run_pipeline(session_id, user_input, &events, &cancel).await
        };
        drop(lock);
        self.release_session_lock(session_id).await;

        match result {
            Ok(reply) => {
                let (prompt, completion, total) = self.llm.token_usage();
                tracing::info!(
                    session = %session_id,
                    chars = reply.chars().count(),
                    prompt,
                    completion,
                    total,
                    "request done"
                );
                Ok(reply)
            }
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "request failed");
                events.emit(AgentEvent::Error { message: e.to_string() });
                Err(e)
            }
        }
    }

    /// 没有其他请求持有或等待时移除会话锁
    async fn release_session_lock(&self, session_id: &str) {
        let mut locks = self.session_locks.lock().await;
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }

    async fn run_pipeline(
        &self,
        session_id: &str,
        user_input: &str,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let history = self.history.get(session_id).await.unwrap_or_else(|e| {
            tracing::warn!(session = %session_id, error = %e, "history load failed, starting empty");
            Vec::new()
        });
        let mut base = self.context.build(user_input, &history, events).await;
        let tools = self.external_tools().await;
        let scope = RequestScope {
            session_id,
            user_input,
            tools: &tools,
            events,
            cancel,
        };

        let mut scheduler = TaskScheduler::new();
        let plan = self.planner.plan(user_input, &history, events).await;
        let tasks = scheduler.set_plan(plan).to_vec();
        events.emit(AgentEvent::TaskList { tasks });
        self.run_tasks(&mut scheduler, &mut base, &scope).await?;

        if !scheduler.tasks().is_empty() {
            for round in 0..self.settings.followup_rounds {
                if cancel.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
                let done = scheduler.completed_results();
                let more = self
                    .planner
                    .plan_followup(user_input, &history, &done, events)
                    .await;
                if more.is_empty() {
                    break;
                }
                tracing::info!(round, tasks = more.len(), "follow-up tasks planned");
                let tasks = scheduler.append_plan(more).to_vec();
                events.emit(AgentEvent::TaskList { tasks });
                self.run_tasks(&mut scheduler, &mut base, &scope).await?;
            }
        }

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        self.finalizer
            .finalize(
                session_id,
                user_input,
                &base.messages,
                &scheduler.completed_results(),
                events,
            )
            .await
    }

    async fn external_tools(&self) -> Vec<ToolSpec> {
        let Some(server) = self.dispatcher.external() else {
            return Vec::new();
        };
        server.list_tools().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "external tool discovery failed");
            Vec::new()
        })
    }

    /// 逐个执行 pending 任务，直到没有 pending
    async fn run_tasks(
        &self,
        scheduler: &mut TaskScheduler,
        base: &mut BaseContext,
        scope: &RequestScope<'_>,
    ) -> Result<(), AgentError> {
        while let Some(index) = scheduler.next_pending() {
            if scope.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let task = scheduler.start(index)?.clone();
            scope.events.emit(AgentEvent::TaskUpdate { task: task.clone() });
            tracing::info!(index, title = %task.title, "task started");

            let mut messages = self
                .task_messages(&task, scheduler, base, scope)
                .await;
            let task_loop = TaskLoop {
                llm: self.llm.as_ref(),
                dispatcher: &self.dispatcher,
                tools: scope.tools,
                max_steps: self.settings.max_task_steps,
                events: scope.events,
                cancel: scope.cancel,
            };
            match task_loop.run(&mut messages).await {
                Ok(text) => {
                    let updated = scheduler.complete(index, text.clone())?.clone();
                    scope.events.emit(AgentEvent::TaskUpdate { task: updated });
                    self.task_memory
                        .append(
                            scope.session_id,
                            TaskResultMemory::new(index, &task.title, &task.deliverable, &text),
                        )
                        .await;
                    tracing::info!(index, "task completed");
                }
                Err(e) => {
                    let updated = scheduler.fail(index, e.to_string())?.clone();
                    scope.events.emit(AgentEvent::TaskUpdate { task: updated });
                    if e.is_fatal() {
                        return Err(e);
                    }
                    tracing::warn!(index, error = %e, "task failed, moving on");
                }
            }
        }
        Ok(())
    }

    /// 子任务提示词：基础上下文 + 本任务相关的技能记忆与子任务结果记忆 + 任务说明
    async fn task_messages(
        &self,
        task: &Task,
        scheduler: &TaskScheduler,
        base: &mut BaseContext,
        scope: &RequestScope<'_>,
    ) -> Vec<Message> {
        let mut messages = base.messages.clone();

        let mut queries = base.queries.clone();
        queries.push(task.title.clone());
        let skill_msgs = self
            .context
            .inject_skill_memories(&queries, &mut base.injected, scope.events)
            .await;
        messages.extend(skill_msgs);

        let task_queries = vec![scope.user_input.to_string(), task.title.clone()];
        let task_msgs = self
            .context
            .inject_task_memories(scope.session_id, &task_queries, scope.events)
            .await;
        messages.extend(task_msgs);

        messages.push(Message::user(render_task_prompt(
            task,
            scheduler.tasks().len(),
            &scheduler.dependency_text(task.index),
            scope.user_input,
        )));
        messages
    }
}

/// 单个子任务的说明
pub fn render_task_prompt(task: &Task, total: usize, dependency_text: &str, user_input: &str) -> String {
    let mut out = format!(
        "用户原始需求：\n{}\n\n当前子任务（第 {}/{} 个）：{}\n",
        user_input,
        task.index + 1,
        total,
        task.title
    );
    if !task.deliverable.is_empty() {
        out.push_str(&format!("预期产物：{}\n", task.deliverable));
    }
    if !task.suggested_skills.is_empty() {
        out.push_str(&format!("建议技能：{}\n", task.suggested_skills.join("、")));
    }
    if !dependency_text.is_empty() {
        out.push_str(&format!("\n依赖的前置任务结果：\n{}\n", dependency_text));
    }
    out.push_str(
        "\n请只完成这个子任务。需要技能或工具时用 CALL_JSONS 调用；完成后以 FINAL: 开头给出该子任务的结果。",
    );
    out
}
