//! 对话消息：角色与内容
//!
//! 与 LLM API 一致的 system / user / assistant 三种角色；会话历史、任务提示词、记忆注入都以 Message 列表流转。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// 取历史中最近 n 条用户输入（按时间顺序），用于记忆检索的 query
pub fn recent_user_inputs(history: &[Message], n: usize) -> Vec<String> {
    let mut out: Vec<String> = history
        .iter()
        .rev()
        .filter(|m| m.is_user())
        .take(n)
        .map(|m| m.content.clone())
        .collect();
    out.reverse();
    out
}

/// 文本截断预览（按字符），超出部分以 `…(N字符)` 标注
pub fn clip(s: &str, n: usize) -> String {
    let total = s.chars().count();
    if total <= n {
        return s.to_string();
    }
    let head: String = s.chars().take(n).collect();
    format!("{}…({}字符)", head, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_user_inputs_keeps_order() {
        let history = vec![
            Message::user("a"),
            Message::assistant("x"),
            Message::user("b"),
            Message::user("c"),
        ];
        assert_eq!(recent_user_inputs(&history, 2), vec!["b", "c"]);
        assert_eq!(recent_user_inputs(&history, 10), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip("春风", 5), "春风");
        assert_eq!(clip("春风又绿江南岸", 2), "春风…(7字符)");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert!(json.contains("\"assistant\""));
    }
}
