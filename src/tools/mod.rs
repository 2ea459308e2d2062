//! 工具层：调用队列、调度、超时审计、调用格式 Schema、外部工具服务（MCP）

pub mod dispatcher;
pub mod executor;
pub mod mcp;
pub mod queue;
pub mod schema;

pub use dispatcher::{DispatchOutcome, SkillOp, ToolDispatcher, ToolTarget};
pub use executor::ToolExecutor;
pub use mcp::{ExternalToolServer, McpError, McpHub, McpStdioClient};
pub use queue::{ToolCall, ToolCallQueue, ToolCallStatus};
pub use schema::{render_tool_catalog, tool_call_schema_json, ToolSpec};
