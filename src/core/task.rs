//! 任务模型：规划产出的子任务与其状态机
//!
//! 状态只能 pending → in_progress → completed / failed 单向推进。

use serde::{Deserialize, Serialize};

/// 子任务状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// 规划器输出的一项（尚未编号）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTask {
    pub title: String,
    /// 计划内的下标，只保留指向更靠前项的依赖
    #[serde(default)]
    pub depends_on: Vec<usize>,
    #[serde(default)]
    pub deliverable: String,
    #[serde(default)]
    pub suggested_skills: Vec<String>,
}

impl PlannedTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = usize>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }
}

/// 一个子任务
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub index: usize,
    pub title: String,
    pub depends_on: Vec<usize>,
    pub deliverable: String,
    pub suggested_skills: Vec<String>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn from_planned(index: usize, planned: PlannedTask) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            index,
            title: planned.title,
            depends_on: planned.depends_on,
            deliverable: planned.deliverable,
            suggested_skills: planned.suggested_skills,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 交给汇总阶段的单个任务结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub title: String,
    pub result: String,
}
