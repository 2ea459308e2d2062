//! 核心层：错误、子任务模型与调度、Agent 装配

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod task;
pub mod task_scheduler;

pub use builder::AgentBuilder;
pub use error::{AgentError, ProtocolParseError};
pub use orchestrator::{build_agent, create_agent, create_llm_from_config};
pub use task::{PlannedTask, Task, TaskOutcome, TaskStatus};
pub use task_scheduler::TaskScheduler;
