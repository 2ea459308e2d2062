//! 子任务推理循环
//!
//! 调用模型 -> 解析工具调用标记 -> 有调用则入队并串行执行，把结果消息写回上下文后再次调用模型；
//! 没有调用时整段回复（去掉开头的 FINAL:）即子任务结果。
//! 每个子任务最多 max_steps 次模型调用；用完后追加一次不带工具的「请给出最终回答」调用，
//! 若模型仍在请求工具则返回 StepBudgetExceeded。每次模型调用与工具调度前检查取消。

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::events::{AgentEvent, EventSink};
use crate::react::protocol::{parse_tool_calls, strip_final_marker};
use crate::tools::{ToolCallQueue, ToolDispatcher, ToolSpec};

/// 步数用尽后的收尾提示
const FORCE_FINAL_PROMPT: &str = "请根据已有信息给出最终简洁回答，不要再调用任何工具。";

/// 单个子任务推理循环所需的协作方
pub struct TaskLoop<'a> {
    pub llm: &'a dyn LlmClient,
    pub dispatcher: &'a ToolDispatcher,
    /// 外部发现的工具声明
    pub tools: &'a [ToolSpec],
    pub max_steps: usize,
    pub events: &'a EventSink,
    pub cancel: &'a CancellationToken,
}

impl<'a> TaskLoop<'a> {
    fn check_cancel(&self) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }

    async fn call_model(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<String, AgentError> {
        self.check_cancel()?;
        let reply = self.llm.chat(messages, tools).await?;
        self.events.emit(AgentEvent::LlmUsage { usage: reply.usage });
        Ok(reply.content)
    }

    /// 执行推理循环，返回子任务的最终文本
    pub async fn run(&self, messages: &mut Vec<Message>) -> Result<String, AgentError> {
        let mut queue = ToolCallQueue::new();
        let max_steps = self.max_steps.max(1);

        for step in 0..max_steps {
            let reply = self.call_model(messages, self.tools).await?;
            let calls = match parse_tool_calls(&reply) {
                Ok(calls) => calls,
                Err(e) => {
                    tracing::warn!(step, error = %e, "tool call marker present but undecodable, treating reply as answer");
                    self.events.emit(AgentEvent::ProtocolError { reason: e.to_string() });
                    Vec::new()
                }
            };
            if calls.is_empty() {
                return Ok(strip_final_marker(&reply));
            }

            tracing::info!(step, calls = calls.len(), "model requested tools");
            let snapshot = queue.enqueue(calls);
            self.events.emit(AgentEvent::ToolCalls { calls: snapshot });
            messages.push(Message::assistant(reply));
            let outcomes = self.dispatcher.drain(&mut queue, self.events, self.cancel).await?;
            messages.extend(outcomes);
        }

        tracing::warn!(max_steps, "step budget exhausted, forcing a final answer");
        messages.push(Message::user(FORCE_FINAL_PROMPT));
        let reply = self.call_model(messages, &[]).await?;
        match parse_tool_calls(&reply) {
            Ok(calls) if !calls.is_empty() => Err(AgentError::StepBudgetExceeded { steps: max_steps }),
            _ => Ok(strip_final_marker(&reply)),
        }
    }
}
