//! ProjectMind - 对话任务执行引擎
//!
//! 模块划分：
//! - **agent**: 单次请求的执行流水线（规划、逐个执行子任务、汇总）
//! - **cli**: 命令行参数（clap）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、子任务模型与调度、Agent 装配
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 会话历史、技能记忆、子任务结果记忆与记忆选择
//! - **observability**: 日志初始化
//! - **react**: 事件协议、输出协议解码、规划、上下文构建、推理循环、汇总
//! - **skills**: 文件系统技能（SKILL.md、references、scripts）
//! - **tools**: 工具调用队列、分发、超时执行、外部工具服务（MCP）

pub mod agent;
pub mod cli;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod skills;
pub mod tools;

pub use agent::{Agent, EngineSettings};
pub use core::{create_agent, AgentBuilder, AgentError};
pub use react::{AgentEvent, EventSink};
