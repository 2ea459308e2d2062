//! 推理层：事件协议、输出协议解码、任务规划、上下文构建、子任务推理循环、汇总

pub mod context;
pub mod events;
pub mod finalizer;
pub mod loop_;
pub mod planner;
pub mod protocol;

pub use context::{render_skills_system, BaseContext, ContextBuilder};
pub use events::{AgentEvent, EventSink, MemoryUsage};
pub use finalizer::Finalizer;
pub use loop_::TaskLoop;
pub use planner::{parse_plan, TaskPlanner};
pub use protocol::{parse_tool_calls, strip_final_marker, ToolCallRequest, FINAL_MARKER, TOOL_CALL_MARKER};
