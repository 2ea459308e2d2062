//! 汇总：把所有子任务结果整理成一份面向用户的回答
//!
//! 单次模型调用；去掉开头的 FINAL: 后写入会话历史并发出 done 事件。

use std::sync::Arc;

use crate::core::task::TaskOutcome;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{Message, SessionHistoryStore};
use crate::react::events::{AgentEvent, EventSink};
use crate::react::protocol::strip_final_marker;

pub struct Finalizer {
    llm: Arc<dyn LlmClient>,
    history: Arc<dyn SessionHistoryStore>,
    max_turns: usize,
}

/// 汇总提示词
pub fn build_final_prompt(user_input: &str, outcomes: &[TaskOutcome]) -> String {
    if outcomes.is_empty() {
        return format!(
            "本次用户需求：\n{}\n\n没有需要执行的子任务（已有上下文足以回答，或无需拆解）。\
             请直接根据上下文给出完整、自然的最终回答，不要再调用任何工具。",
            user_input
        );
    }
    let results = outcomes
        .iter()
        .enumerate()
        .map(|(i, t)| format!("### 子任务 {}：{}\n{}", i + 1, t.title, t.result))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "本次用户需求：\n{}\n\n各子任务的执行结果如下：\n\n{}\n\n\
         请基于以上结果，整理出一份面向用户的完整报告（自然语言），\
         保留关键产物原文，不要再调用任何工具。",
        user_input, results
    )
}

impl Finalizer {
    pub fn new(llm: Arc<dyn LlmClient>, history: Arc<dyn SessionHistoryStore>, max_turns: usize) -> Self {
        Self {
            llm,
            history,
            max_turns,
        }
    }

    pub async fn finalize(
        &self,
        session_id: &str,
        user_input: &str,
        base: &[Message],
        outcomes: &[TaskOutcome],
        events: &EventSink,
    ) -> Result<String, AgentError> {
        let mut messages = base.to_vec();
        messages.push(Message::user(build_final_prompt(user_input, outcomes)));

        let reply = self.llm.chat(&messages, &[]).await?;
        events.emit(AgentEvent::LlmUsage { usage: reply.usage });
        let text = strip_final_marker(&reply.content);

        if let Err(e) = self
            .history
            .append(
                session_id,
                vec![Message::user(user_input), Message::assistant(text.clone())],
                self.max_turns,
            )
            .await
        {
            tracing::warn!(session = %session_id, error = %e, "history append failed");
        }
        events.emit(AgentEvent::Done { reply: text.clone() });
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::memory::InMemoryHistoryStore;

    #[test]
    fn test_prompt_mentions_no_tasks() {
        assert!(build_final_prompt("你好", &[]).contains("没有需要执行的子任务"));
        let p = build_final_prompt(
            "写诗",
            &[TaskOutcome {
                title: "写七绝".into(),
                result: "春眠不觉晓".into(),
            }],
        );
        assert!(p.contains("子任务 1：写七绝"));
        assert!(p.contains("春眠不觉晓"));
    }

    #[tokio::test]
    async fn test_finalize_appends_history_and_emits_done() {
        let mock = Arc::new(MockLlmClient::with_replies(["FINAL: 报告"]));
        let history = Arc::new(InMemoryHistoryStore::new());
        let f = Finalizer::new(mock, history.clone(), 12);
        let (sink, mut rx) = EventSink::channel();
        let text = f.finalize("s", "写诗", &[], &[], &sink).await.unwrap();
        assert_eq!(text, "报告");

        let stored = history.get("s").await.unwrap();
        assert_eq!(stored, vec![Message::user("写诗"), Message::assistant("报告")]);

        let mut last = None;
        while let Ok(ev) = rx.try_recv() {
            last = Some(ev);
        }
        assert!(matches!(last, Some(AgentEvent::Done { reply }) if reply == "报告"));
    }
}
