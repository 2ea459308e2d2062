//! 工具调用队列：单个子任务推理循环内的 FIFO
//!
//! 每个子任务开始前清空。enqueue 为每个调用分配 id 并置为 pending；
//! 执行方每次取第一个 pending 调用，严格串行推进 running → completed / failed。

use serde::Serialize;

use crate::react::protocol::ToolCallRequest;

/// 工具调用状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// 队列中的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub provider: String,
    pub tool: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    fn from_request(req: ToolCallRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider: req.provider,
            tool: req.tool,
            tool_name: req.tool_name,
            input: req.input,
            status: ToolCallStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            result: None,
            error: None,
        }
    }

    fn finish(&mut self, status: ToolCallStatus) {
        let now = chrono::Utc::now().timestamp_millis();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = self.started_at.map(|s| now - s);
    }
}

/// 工具调用队列
#[derive(Debug, Default)]
pub struct ToolCallQueue {
    calls: Vec<ToolCall>,
}

impl ToolCallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队并返回新入队调用的快照（用于 tool_calls 事件）
    pub fn enqueue(&mut self, requests: Vec<ToolCallRequest>) -> Vec<ToolCall> {
        let start = self.calls.len();
        self.calls
            .extend(requests.into_iter().map(ToolCall::from_request));
        self.calls[start..].to_vec()
    }

    /// 第一个 pending 调用的位置
    pub fn next_pending(&self) -> Option<usize> {
        self.calls
            .iter()
            .position(|c| c.status == ToolCallStatus::Pending)
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn mark_running(&mut self, pos: usize) -> Option<&ToolCall> {
        let call = self.calls.get_mut(pos)?;
        call.status = ToolCallStatus::Running;
        call.started_at = Some(chrono::Utc::now().timestamp_millis());
        Some(call)
    }

    pub fn mark_completed(&mut self, pos: usize, result: serde_json::Value) -> Option<&ToolCall> {
        let call = self.calls.get_mut(pos)?;
        call.result = Some(result);
        call.finish(ToolCallStatus::Completed);
        Some(call)
    }

    pub fn mark_failed(&mut self, pos: usize, error: String) -> Option<&ToolCall> {
        let call = self.calls.get_mut(pos)?;
        call.error = Some(error);
        call.finish(ToolCallStatus::Failed);
        Some(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(tool: &str) -> ToolCallRequest {
        ToolCallRequest::new("mcp", tool, serde_json::json!({}))
    }

    #[test]
    fn test_fifo_and_status_flow() {
        let mut q = ToolCallQueue::new();
        let snapshot = q.enqueue(vec![req("a"), req("b")]);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|c| c.status == ToolCallStatus::Pending));
        assert_ne!(snapshot[0].id, snapshot[1].id);

        let first = q.next_pending().unwrap();
        assert_eq!(q.calls()[first].tool, "mcp.a");
        let running = q.mark_running(first).unwrap();
        assert_eq!(running.status, ToolCallStatus::Running);
        assert!(running.started_at.is_some());
        assert_eq!(q.next_pending(), Some(1));
        let done = q.mark_completed(first, serde_json::json!("ok")).unwrap();
        assert_eq!(done.status, ToolCallStatus::Completed);
        assert!(done.duration_ms.unwrap() >= 0);

        q.mark_running(1);
        q.mark_failed(1, "boom".into());
        assert_eq!(q.next_pending(), None);
        assert_eq!(q.calls()[1].error.as_deref(), Some("boom"));
    }
}
