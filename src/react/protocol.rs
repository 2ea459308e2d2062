//! 模型输出协议解码：工具调用标记、终止标记、JSON 数组
//!
//! 工具调用：`CALL_JSONS: [{"provider": "...", "tool": "...", "input": {...}}, ...]`
//! （兼容 `CALL_JSON`，分隔符 `:` / `=` 可省略，大小写不敏感）。
//! 终止：`FINAL: <答案>`，模型省略标记时整段回复即答案。
//!
//! 解码结果是带标签的：`Ok(vec![])` 表示没有请求工具，`Err(ProtocolParseError)` 表示标记存在但内容不合法。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::core::error::ProtocolParseError;

/// 工具调用标记（写入提示词时使用的规范形式）
pub const TOOL_CALL_MARKER: &str = "CALL_JSONS:";
/// 终止标记
pub const FINAL_MARKER: &str = "FINAL:";

const PREVIEW_CHARS: usize = 40;

static MARKER_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn marker_re() -> Option<&'static Regex> {
    MARKER_RE
        .get_or_init(|| Regex::new(r"(?i)CALL_JSONS?\s*[:=]?\s*").ok())
        .as_ref()
}

/// 一次工具调用请求（已规范化）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    /// provider 标签（openskills / skill / mcp ...）
    pub provider: String,
    /// 规范名 `provider.toolName`
    pub tool: String,
    /// 去掉 provider 前缀后的工具名
    pub tool_name: String,
    pub input: serde_json::Value,
}

impl ToolCallRequest {
    /// 由原始 provider / tool 构造；带点的 tool 在 provider 为空时提供 provider
    pub fn new(provider: &str, tool: &str, input: serde_json::Value) -> Self {
        let mut provider = provider.trim().to_string();
        let mut tool_name = tool.trim().to_string();
        if let Some((head, rest)) = tool_name.split_once('.') {
            if provider.is_empty() {
                provider = head.to_string();
                tool_name = rest.to_string();
            } else if head == provider {
                tool_name = rest.to_string();
            }
        }
        let tool = if provider.is_empty() {
            tool_name.clone()
        } else {
            format!("{}.{}", provider, tool_name)
        };
        Self {
            provider,
            tool,
            tool_name,
            input,
        }
    }

    fn dedup_key(&self) -> String {
        format!("{}|{}|{}", self.provider, self.tool, self.input)
    }
}

fn preview(s: &str) -> String {
    s.chars().take(PREVIEW_CHARS).collect()
}

/// 从回复中解码工具调用
///
/// - 无标记：`Ok(vec![])`
/// - 标记后不是 JSON 数组 / JSON 不完整 / 元素缺少 tool：`Err`
/// - 同一回复内 (provider, tool, input) 相同的调用只保留第一个
pub fn parse_tool_calls(reply: &str) -> Result<Vec<ToolCallRequest>, ProtocolParseError> {
    let Some(re) = marker_re() else {
        return Ok(Vec::new());
    };
    // 正文里可能先提到标记名，取第一个后面紧跟数组的出现
    let mut first_bare = None;
    let mut found = None;
    for m in re.find_iter(reply) {
        let rest = &reply[m.end()..];
        if rest.starts_with('[') {
            found = Some((m.as_str().trim().to_string(), rest));
            break;
        }
        first_bare.get_or_insert(rest);
    }
    let Some((marker, rest)) = found else {
        return match first_bare {
            Some(rest) => Err(ProtocolParseError::NotAnArray {
                found: preview(rest),
            }),
            None => Ok(Vec::new()),
        };
    };

    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<serde_json::Value>();
    let value = match stream.next() {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            return Err(ProtocolParseError::MalformedJson {
                marker,
                reason: e.to_string(),
            })
        }
        None => return Err(ProtocolParseError::MissingArray),
    };
    let serde_json::Value::Array(items) = value else {
        return Err(ProtocolParseError::NotAnArray {
            found: preview(&value.to_string()),
        });
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let serde_json::Value::Object(obj) = item else {
            return Err(ProtocolParseError::InvalidCall {
                index,
                reason: "not an object".to_string(),
            });
        };
        let text = |k: &str| obj.get(k).and_then(|v| v.as_str()).unwrap_or_default();
        let tool = text("tool");
        if tool.trim().is_empty() {
            return Err(ProtocolParseError::InvalidCall {
                index,
                reason: "missing tool".to_string(),
            });
        }
        let input = obj
            .get("input")
            .cloned()
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| serde_json::json!({}));
        let call = ToolCallRequest::new(text("provider"), tool, input);
        if call.provider.is_empty() {
            return Err(ProtocolParseError::InvalidCall {
                index,
                reason: format!("missing provider for tool {}", call.tool_name),
            });
        }
        if seen.insert(call.dedup_key()) {
            out.push(call);
        }
    }
    Ok(out)
}

/// 去掉开头的终止标记；没有标记时原样返回
pub fn strip_final_marker(reply: &str) -> String {
    let trimmed = reply.trim_start();
    match trimmed.get(..FINAL_MARKER.len()) {
        Some(head) if head.eq_ignore_ascii_case(FINAL_MARKER) => {
            trimmed[FINAL_MARKER.len()..].trim_start().to_string()
        }
        _ => reply.to_string(),
    }
}

/// 宽松解析 JSON 数组：先整体解析，失败时取第一个 `[` 到最后一个 `]` 之间的子串
pub fn parse_json_array(reply: &str) -> Result<Vec<serde_json::Value>, ProtocolParseError> {
    let trimmed = reply.trim();
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(trimmed) {
        return Ok(items);
    }
    let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) else {
        return Err(ProtocolParseError::MissingArray);
    };
    if end < start {
        return Err(ProtocolParseError::MissingArray);
    }
    match serde_json::from_str(&trimmed[start..=end]) {
        Ok(serde_json::Value::Array(items)) => Ok(items),
        Ok(other) => Err(ProtocolParseError::NotAnArray {
            found: preview(&other.to_string()),
        }),
        Err(e) => Err(ProtocolParseError::MalformedJson {
            marker: "[".to_string(),
            reason: e.to_string(),
        }),
    }
}

/// 解析编号数组：元素可以是非负整数或数字字符串，其余元素忽略
pub fn parse_index_array(reply: &str) -> Result<Vec<usize>, ProtocolParseError> {
    let items = parse_json_array(reply)?;
    Ok(items
        .iter()
        .filter_map(|v| match v {
            serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
            serde_json::Value::String(s) => s.trim().parse::<usize>().ok(),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_marker_means_no_calls() {
        assert_eq!(parse_tool_calls("春风又绿江南岸").unwrap(), vec![]);
    }

    #[test]
    fn test_parse_and_normalize() {
        let reply = r#"我先读取技能。
CALL_JSONS: [{"provider":"openskills","tool":"read","input":{"skill":"poem_writer"}},
{"tool":"openskills.readReference","input":{"skill":"poem_writer","file":"qijue.md"}}]"#;
        let calls = parse_tool_calls(reply).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool, "openskills.read");
        assert_eq!(calls[0].tool_name, "read");
        assert_eq!(calls[1].provider, "openskills");
        assert_eq!(calls[1].tool_name, "readReference");
    }

    #[test]
    fn test_legacy_marker_and_separator() {
        let calls = parse_tool_calls(r#"call_json=[{"provider":"mcp","tool":"search","input":{}}]"#).unwrap();
        assert_eq!(calls[0].tool, "mcp.search");
    }

    #[test]
    fn test_trailing_text_after_array_is_ignored() {
        let calls =
            parse_tool_calls(r#"CALL_JSONS: [{"provider":"mcp","tool":"a"}] 然后我会总结 [1]"#).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, serde_json::json!({}));
    }

    #[test]
    fn test_duplicates_removed() {
        let reply = r#"CALL_JSONS: [{"provider":"mcp","tool":"a","input":{"q":1}},{"tool":"mcp.a","input":{"q":1}},{"provider":"mcp","tool":"a","input":{"q":2}}]"#;
        assert_eq!(parse_tool_calls(reply).unwrap().len(), 2);
    }

    #[test]
    fn test_malformed_is_distinguishable_from_none() {
        let err = parse_tool_calls(r#"CALL_JSONS: [{"provider":"mcp","tool":"#).unwrap_err();
        assert!(matches!(err, ProtocolParseError::MalformedJson { .. }));

        let err = parse_tool_calls("CALL_JSONS: 读取技能").unwrap_err();
        assert!(matches!(err, ProtocolParseError::NotAnArray { .. }));

        let err = parse_tool_calls(r#"CALL_JSONS: [{"provider":"mcp"}]"#).unwrap_err();
        assert!(matches!(err, ProtocolParseError::InvalidCall { index: 0, .. }));
    }

    #[test]
    fn test_marker_named_in_prose_before_real_call() {
        let reply = "我会按约定用 CALL_JSONS 格式读取技能：\nCALL_JSONS: [{\"provider\":\"openskills\",\"tool\":\"read\",\"input\":{\"skill\":\"poem_writer\"}}]";
        let calls = parse_tool_calls(reply).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "openskills.read");

        let err = parse_tool_calls("先说明 CALL_JSONS 的用法，再用 call_json 格式").unwrap_err();
        assert!(matches!(err, ProtocolParseError::NotAnArray { .. }));
    }

    #[test]
    fn test_strip_final_marker() {
        assert_eq!(strip_final_marker("  FINAL: 诗句"), "诗句");
        assert_eq!(strip_final_marker("final:ok"), "ok");
        assert_eq!(strip_final_marker("没有标记"), "没有标记");
    }

    #[test]
    fn test_json_array_tolerant() {
        assert_eq!(parse_json_array("[1,2]").unwrap().len(), 2);
        assert_eq!(parse_json_array("结果如下：\n[{\"title\":\"a\"}]\n完毕").unwrap().len(), 1);
        assert_eq!(parse_json_array("没有数组"), Err(ProtocolParseError::MissingArray));
    }

    #[test]
    fn test_index_array_accepts_numeric_strings() {
        assert_eq!(parse_index_array(r#"[0, "2", "x", -1]"#).unwrap(), vec![0, 2]);
    }
}
