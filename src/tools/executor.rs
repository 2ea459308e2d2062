//! 工具执行器
//!
//! 对每次工具调度施加全局超时，超时转为 AgentError::ToolTimeout；每次调用输出结构化审计日志（JSON）。

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;

/// 工具执行器：超时 + 审计
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 在超时内执行 fut；输出 JSON 审计日志
    pub async fn execute<T, F>(
        &self,
        provider: &str,
        tool: &str,
        args: &serde_json::Value,
        fut: F,
    ) -> Result<T, AgentError>
    where
        F: Future<Output = Result<T, AgentError>>,
    {
        let start = Instant::now();
        let result = timeout(self.timeout, fut).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "provider": provider,
            "tool": tool,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(r) => r,
            Err(_) => Err(AgentError::ToolTimeout(format!("{}.{}", provider, tool))),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
