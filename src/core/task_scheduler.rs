//! 任务调度：按列表顺序逐个执行子任务
//!
//! 下一个任务 = 列表中第一个 pending 的任务，不看 dependsOn。
//! dependsOn 只用于把前置任务的结果拼进当前任务的提示词；执行顺序完全由规划器给出的顺序决定。
//! 调度器是单次请求内的值，不跨请求共享。

use crate::core::error::AgentError;
use crate::core::task::{PlannedTask, Task, TaskOutcome, TaskStatus};

/// 单次请求内的任务列表与状态推进
#[derive(Debug, Default)]
pub struct TaskScheduler {
    tasks: Vec<Task>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以新计划替换任务列表
    pub fn set_plan(&mut self, plan: Vec<PlannedTask>) -> &[Task] {
        self.tasks.clear();
        self.append_plan(plan)
    }

    /// 追加一轮计划：下标接续，计划内的依赖下标整体平移
    pub fn append_plan(&mut self, plan: Vec<PlannedTask>) -> &[Task] {
        let offset = self.tasks.len();
        for (i, mut planned) in plan.into_iter().enumerate() {
            planned.depends_on = planned.depends_on.iter().map(|d| d + offset).collect();
            self.tasks.push(Task::from_planned(offset + i, planned));
        }
        &self.tasks
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    /// 第一个 pending 任务的下标
    pub fn next_pending(&self) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.status == TaskStatus::Pending)
    }

    fn transition(
        &mut self,
        index: usize,
        next: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<&Task, AgentError> {
        let task = self
            .tasks
            .get_mut(index)
            .ok_or_else(|| AgentError::TaskState(format!("task #{} not found", index)))?;
        if !task.status.can_transition_to(next) {
            return Err(AgentError::TaskState(format!(
                "task #{} cannot go from {:?} to {:?}",
                index, task.status, next
            )));
        }
        task.status = next;
        if result.is_some() {
            task.result = result;
        }
        if error.is_some() {
            task.error = error;
        }
        task.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(task)
    }

    pub fn start(&mut self, index: usize) -> Result<&Task, AgentError> {
        self.transition(index, TaskStatus::InProgress, None, None)
    }

    pub fn complete(&mut self, index: usize, result: String) -> Result<&Task, AgentError> {
        self.transition(index, TaskStatus::Completed, Some(result), None)
    }

    pub fn fail(&mut self, index: usize, error: String) -> Result<&Task, AgentError> {
        self.transition(index, TaskStatus::Failed, None, Some(error))
    }

    /// 拼接该任务所依赖、且已经产出结果的前置任务（标题 + 结果）
    pub fn dependency_text(&self, index: usize) -> String {
        let Some(task) = self.tasks.get(index) else {
            return String::new();
        };
        task.depends_on
            .iter()
            .filter_map(|d| self.tasks.get(*d))
            .filter_map(|dep| {
                dep.result
                    .as_deref()
                    .map(|r| format!("【{}】\n{}", dep.title, r))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// 按列表顺序返回已完成任务的 (标题, 结果)
    pub fn completed_results(&self) -> Vec<TaskOutcome> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| TaskOutcome {
                title: t.title.clone(),
                result: t.result.clone().unwrap_or_default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Vec<PlannedTask> {
        vec![
            PlannedTask::new("a"),
            PlannedTask::new("b").depends_on([0]),
            PlannedTask::new("c").depends_on([0, 1]),
        ]
    }

    #[test]
    fn test_next_pending_is_list_order_regardless_of_deps() {
        let mut s = TaskScheduler::new();
        // 依赖指向更靠后的任务，调度器也不重排
        s.set_plan(vec![
            PlannedTask::new("x").depends_on([2]),
            PlannedTask::new("y"),
            PlannedTask::new("z"),
        ]);
        let mut order = Vec::new();
        while let Some(i) = s.next_pending() {
            s.start(i).unwrap();
            s.complete(i, format!("r{}", i)).unwrap();
            order.push(i);
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_failed_task_does_not_block_next() {
        let mut s = TaskScheduler::new();
        s.set_plan(plan());
        s.start(0).unwrap();
        s.fail(0, "boom".into()).unwrap();
        assert_eq!(s.next_pending(), Some(1));
        assert_eq!(s.tasks()[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut s = TaskScheduler::new();
        s.set_plan(plan());
        assert!(s.complete(0, "x".into()).is_err());
        s.start(0).unwrap();
        assert!(s.start(0).is_err());
    }

    #[test]
    fn test_dependency_text_only_includes_finished_deps() {
        let mut s = TaskScheduler::new();
        s.set_plan(plan());
        s.start(0).unwrap();
        s.complete(0, "结果A".into()).unwrap();
        let text = s.dependency_text(2);
        assert!(text.contains("【a】\n结果A"));
        assert!(!text.contains("【b】"));
    }

    #[test]
    fn test_append_plan_offsets_indices_and_deps() {
        let mut s = TaskScheduler::new();
        s.set_plan(plan());
        s.append_plan(vec![PlannedTask::new("d"), PlannedTask::new("e").depends_on([0])]);
        let tasks = s.tasks();
        assert_eq!(tasks.len(), 5);
        assert_eq!(tasks[4].index, 4);
        assert_eq!(tasks[4].depends_on, vec![3]);
    }

    #[test]
    fn test_completed_results_in_order() {
        let mut s = TaskScheduler::new();
        s.set_plan(plan());
        for i in 0..3 {
            s.start(i).unwrap();
        }
        s.complete(1, "B".into()).unwrap();
        s.complete(0, "A".into()).unwrap();
        s.fail(2, "x".into()).unwrap();
        let results = s.completed_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].result, "A");
        assert_eq!(results[1].title, "b");
    }
}
