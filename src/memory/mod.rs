//! 记忆层：对话消息、会话历史、技能记忆、子任务结果记忆与记忆选择

pub mod conversation;
pub mod document_store;
pub mod history;
pub mod persistence;
pub mod selector;
pub mod skill_memory;
pub mod task_memory;

pub use conversation::{clip, recent_user_inputs, Message, Role};
pub use document_store::{JsonFileMemoryStore, MemoryDocumentStore};
pub use history::{InMemoryHistoryStore, SessionHistoryStore};
pub use persistence::FileHistoryStore;
pub use selector::{MemorySelector, Selectable};
pub use skill_memory::{MemoryEntry, MemoryKey, SkillMemoryPool, SkillToolName};
pub use task_memory::{TaskMemoryStore, TaskResultMemory};
