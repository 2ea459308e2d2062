//! 工具声明与工具调用 JSON Schema（schemars 自动生成）
//!
//! 外部工具服务发现的工具以 ToolSpec 形式交给模型；调用格式的 Schema 拼入 system prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

/// 一个可被模型调用的外部工具声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// 工具调用格式：`CALL_JSONS:` 之后数组中的元素（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// provider 标签：openskills（技能）或 mcp（外部工具）
    pub provider: String,
    /// 工具名，如 read、readReference、call 或外部工具名
    pub tool: String,
    /// 工具入参
    pub input: serde_json::Value,
}

/// 返回工具调用元素的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 外部工具目录（作为 system 消息交给模型）
pub fn render_tool_catalog(tools: &[ToolSpec]) -> String {
    let mut out = String::from(
        "可用的外部工具（provider 为 mcp，用 CALL_JSONS 调用）：\n",
    );
    for t in tools {
        out.push_str(&format!("- {}: {}\n", t.name, t.description.trim()));
        if !t.input_schema.is_null() {
            out.push_str(&format!("  input schema: {}\n", t.input_schema));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_fields() {
        let s = tool_call_schema_json();
        assert!(s.contains("provider"));
        assert!(s.contains("input"));
    }

    #[test]
    fn test_catalog_lists_tools() {
        let text = render_tool_catalog(&[ToolSpec::new(
            "search",
            "web search ",
            serde_json::json!({"type": "object"}),
        )]);
        assert!(text.contains("- search: web search\n"));
        assert!(text.contains("\"type\":\"object\""));
    }
}
