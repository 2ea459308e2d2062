//! 引擎错误类型
//!
//! 规划失败在 Planner 内部消化（返回空计划）；工具调度失败由队列逐条捕获并反馈给模型；
//! 模型调用失败对整个请求致命；协议解析失败可恢复，且与「没有工具调用」区分开。

use thiserror::Error;

use crate::llm::LlmError;
use crate::skills::SkillError;
use crate::tools::McpError;

/// 请求执行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 推理或汇总阶段的模型调用失败（致命）
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unsupported tool: {0}")]
    UnsupportedTool(String),

    #[error("Skill error: {0}")]
    Skill(#[from] SkillError),

    #[error("External tool error: {0}")]
    External(#[from] McpError),

    #[error("Protocol parse error: {0}")]
    ProtocolParse(#[from] ProtocolParseError),

    /// 单个子任务超过最大推理步数，且强制收尾后模型仍在请求工具
    #[error("Step budget exceeded after {steps} steps")]
    StepBudgetExceeded { steps: usize },

    #[error("Task state error: {0}")]
    TaskState(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 是否对整个请求致命（模型失败、取消）；其余错误都在任务或工具粒度内恢复
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Llm(_) | AgentError::Cancelled)
    }
}

/// 模型输出（工具调用标记、计划 JSON、记忆选择 JSON）不符合约定格式
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolParseError {
    #[error("malformed JSON after {marker}: {reason}")]
    MalformedJson { marker: String, reason: String },

    #[error("expected a JSON array, found {found}")]
    NotAnArray { found: String },

    #[error("invalid tool call at position {index}: {reason}")]
    InvalidCall { index: usize, reason: String },

    #[error("no JSON array found in reply")]
    MissingArray,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(AgentError::Llm(LlmError::EmptyResponse).is_fatal());
        assert!(AgentError::Cancelled.is_fatal());
        assert!(!AgentError::ToolTimeout("mcp.search".into()).is_fatal());
        assert!(!AgentError::StepBudgetExceeded { steps: 3 }.is_fatal());
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: AgentError = ProtocolParseError::MissingArray.into();
        assert!(err.to_string().contains("no JSON array"));
    }
}
