//! 任务规划器：把用户需求拆解为有序的子任务列表
//!
//! 模型只允许输出 JSON 数组 `[{title, dependsOn?, deliverable?, suggestedSkills?}]`。
//! 解析宽松：先整体解析，失败时取第一个 `[` 到最后一个 `]`。没有可用 title 的项被丢弃，
//! 依赖下标随之重映射，且只保留指向更靠前项的依赖。任何失败（模型错误、格式错误）都返回空计划。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::task::{PlannedTask, TaskOutcome};
use crate::llm::LlmClient;
use crate::memory::{clip, Message};
use crate::react::events::{AgentEvent, EventSink};
use crate::react::protocol::parse_json_array;

const HISTORY_ITEM_CHARS: usize = 800;
const RESULT_ITEM_CHARS: usize = 1500;

const PLANNER_SYSTEM: &str = "你是一个“任务拆解器”。你的工作是把用户输入拆解为可执行的子任务列表。\
你必须只输出一个 JSON 数组，数组元素为对象，不要输出任何其他文字。";

const PLANNER_RULES: &str = "要求：\n\
- 子任务一定是为了完成“历史上下文中尚未完成的事情”，不要重复拆解已经完成的工作。\n\
- 如果你判断：历史上下文已经包含完成本次需求所需的关键结果，且不需要进一步动作，请直接返回空数组 []。\n\
- 子任务要按执行顺序排列。\n\
- 子任务要能直接执行，尽量具体，但不要包含工具调用格式。\n\
- 如果子任务依赖前面任务的结果，请在 dependsOn 里填依赖的子任务序号（从 0 开始）。\n\
- deliverable 用一句话描述该子任务的产物（可选）。\n\
- suggestedSkills 填可能用到的技能名（可选）。\n\
- 如果需求很简单，可以只返回 1 条。\n\n\
只输出 JSON 数组，例如：\n\
[\n\
  {\"title\":\"获取变更文件列表\",\"dependsOn\":[],\"deliverable\":\"变更文件列表\"},\n\
  {\"title\":\"针对每个文件获取 diff 并审查\",\"dependsOn\":[0],\"deliverable\":\"每个文件的问题表格\"}\n\
]";

/// 任务规划器
#[derive(Clone)]
pub struct TaskPlanner {
    llm: Arc<dyn LlmClient>,
}

impl TaskPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 首轮规划
    pub async fn plan(&self, user_input: &str, history: &[Message], events: &EventSink) -> Vec<PlannedTask> {
        let user = format!(
            "请基于“历史对话上下文”和“本次用户需求”，拆解为子任务列表：\n\n\
             历史对话上下文（摘要）：\n{}\n\n本次用户需求：\n{}\n\n{}",
            summarize_history(history),
            user_input,
            PLANNER_RULES
        );
        self.ask(user, events).await
    }

    /// 追加轮规划：已完成的子任务结果一并给出，足够回答时应返回 []
    pub async fn plan_followup(
        &self,
        user_input: &str,
        history: &[Message],
        done: &[TaskOutcome],
        events: &EventSink,
    ) -> Vec<PlannedTask> {
        let results = done
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. 【{}】{}", i, t.title, clip(&t.result, RESULT_ITEM_CHARS)))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "以下子任务已经执行完毕，请判断是否还需要追加子任务才能完成本次用户需求：\n\n\
             历史对话上下文（摘要）：\n{}\n\n本次用户需求：\n{}\n\n已完成的子任务结果：\n{}\n\n\
             如果已有结果足够回答，请直接返回空数组 []；否则只列出还需要追加的子任务，\
             dependsOn 只能引用本次追加列表中的序号（从 0 开始）。\n\n{}",
            summarize_history(history),
            user_input,
            if results.is_empty() { "（无）".to_string() } else { results },
            PLANNER_RULES
        );
        self.ask(user, events).await
    }

    async fn ask(&self, user: String, events: &EventSink) -> Vec<PlannedTask> {
        let messages = vec![Message::system(PLANNER_SYSTEM), Message::user(user)];
        let reply = match self.llm.chat(&messages, &[]).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "planning failed, continuing with empty plan");
                return Vec::new();
            }
        };
        events.emit(AgentEvent::LlmUsage { usage: reply.usage });
        match parse_plan(&reply.content) {
            Ok(plan) => {
                tracing::info!(tasks = plan.len(), "plan ready");
                plan
            }
            Err(e) => {
                tracing::warn!(error = %e, "plan reply unparseable, continuing with empty plan");
                Vec::new()
            }
        }
    }
}

/// 历史摘要：JSON 数组形式，单条内容截断
fn summarize_history(history: &[Message]) -> String {
    let clipped: Vec<Message> = history
        .iter()
        .map(|m| Message {
            role: m.role.clone(),
            content: clip(&m.content, HISTORY_ITEM_CHARS),
        })
        .collect();
    serde_json::to_string(&clipped).unwrap_or_else(|_| "[]".to_string())
}

fn as_index(v: &serde_json::Value) -> Option<usize> {
    match v {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 解析并规范化计划
pub fn parse_plan(reply: &str) -> Result<Vec<PlannedTask>, crate::core::error::ProtocolParseError> {
    let items = parse_json_array(reply)?;

    let mut kept: Vec<(usize, PlannedTask, Vec<usize>)> = Vec::new();
    for (orig, item) in items.iter().enumerate() {
        let (title, raw_deps, deliverable, skills) = match item {
            serde_json::Value::String(s) => (s.trim().to_string(), Vec::new(), String::new(), Vec::new()),
            serde_json::Value::Object(obj) => {
                let text = |k: &str| obj.get(k).and_then(|v| v.as_str()).map(str::trim).unwrap_or_default();
                let title = [text("title"), text("task"), text("name")]
                    .into_iter()
                    .find(|t| !t.is_empty())
                    .unwrap_or_default()
                    .to_string();
                let deps = obj
                    .get("dependsOn")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(as_index).collect())
                    .unwrap_or_default();
                let skills = obj
                    .get("suggestedSkills")
                    .and_then(|v| v.as_array())
                    .map(|a| {
                        a.iter()
                            .filter_map(|s| s.as_str())
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default();
                (title, deps, text("deliverable").to_string(), skills)
            }
            _ => continue,
        };
        if title.is_empty() {
            continue;
        }
        let task = PlannedTask {
            title,
            depends_on: Vec::new(),
            deliverable,
            suggested_skills: skills,
        };
        kept.push((orig, task, raw_deps));
    }

    let remap: HashMap<usize, usize> = kept
        .iter()
        .enumerate()
        .map(|(new, (orig, _, _))| (*orig, new))
        .collect();
    Ok(kept
        .into_iter()
        .enumerate()
        .map(|(new, (_, mut task, raw_deps))| {
            let mut deps: Vec<usize> = raw_deps
                .iter()
                .filter_map(|d| remap.get(d).copied())
                .filter(|d| *d < new)
                .collect();
            deps.sort_unstable();
            deps.dedup();
            task.depends_on = deps;
            task
        })
        .collect())
}
