//! 引擎过程事件：用于流式展示记忆注入、任务列表、工具调用与最终回复
//!
//! 每个事件序列化为一个 JSON 对象，`type` 为 snake_case 标签，字段为 camelCase。

use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::task::Task;
use crate::llm::TokenUsage;
use crate::tools::queue::{ToolCall, ToolCallStatus};

/// memory_used 事件中的单条记忆摘要（不含正文）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// `skill` 或 `task`
    pub source: String,
    pub label: String,
    pub snippet: String,
}

/// 单步过程事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 本轮注入了哪些记忆
    MemoryUsed { memories: Vec<MemoryUsage> },
    /// 规划得到的任务列表（追加轮次时为完整列表）
    TaskList { tasks: Vec<Task> },
    /// 某个任务状态变化
    TaskUpdate { task: Task },
    /// 模型一次回复中解析出的工具调用
    ToolCalls { calls: Vec<ToolCall> },
    /// 单个工具调用状态变化
    #[serde(rename_all = "camelCase")]
    ToolUpdate {
        id: String,
        status: ToolCallStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        started_at: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        completed_at: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<i64>,
    },
    /// 一次模型调用的 token 用量
    LlmUsage { usage: TokenUsage },
    /// 工具调用标记存在但无法解码（可恢复，仅提示）
    ProtocolError { reason: String },
    /// 最终回复
    Done { reply: String },
    /// 请求失败（终止事件）
    Error { message: String },
}

impl AgentEvent {
    pub fn tool_update(call: &ToolCall) -> Self {
        AgentEvent::ToolUpdate {
            id: call.id.clone(),
            status: call.status,
            result: call.result.clone(),
            error: call.error.clone(),
            started_at: call.started_at,
            completed_at: call.completed_at,
            duration_ms: call.duration_ms,
        }
    }

    /// done / error 之后不再有事件
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done { .. } | AgentEvent::Error { .. })
    }
}

/// 事件出口：无接收方时静默丢弃
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// 新建通道，返回 (sink, receiver)
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, ev: AgentEvent) {
        if let Some(t) = &self.tx {
            let _ = t.send(ev);
        }
    }
}
