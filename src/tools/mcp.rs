//! 外部工具服务（MCP）：JSON-RPC 2.0 over 子进程 stdio
//!
//! 每个配置的 server 启动一个子进程，握手 `initialize` + `notifications/initialized`，
//! 之后通过 `tools/list` 发现工具、`tools/call` 调用工具。McpHub 聚合多个 server，
//! 按工具名路由到所属 server；连接失败的 server 记录告警后跳过。

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{Mutex, RwLock};

use crate::tools::schema::ToolSpec;

const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "ProjectMind-Client";

#[derive(Error, Debug)]
pub enum McpError {
    #[error("failed to start server {server}: {reason}")]
    Spawn { server: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("tool {0} not found or server unknown")]
    ToolNotFound(String),

    #[error("tool {tool} returned an error: {message}")]
    ToolFailed { tool: String, message: String },
}

/// 外部工具服务接口
#[async_trait]
pub trait ExternalToolServer: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError>;

    async fn call_tool(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, McpError>;
}

/// JSON-RPC 请求
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// 无 id 的通知
    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.into(),
            params: None,
        }
    }

    pub fn initialize(id: u64) -> Self {
        Self::new(
            id,
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION") },
            })),
        )
    }

    pub fn list_tools(id: u64) -> Self {
        Self::new(id, "tools/list", None)
    }

    pub fn call_tool(id: u64, name: &str, arguments: serde_json::Value) -> Self {
        Self::new(
            id,
            "tools/call",
            Some(serde_json::json!({ "name": name, "arguments": arguments })),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC 响应（id 缺失的是 server 主动发来的通知）
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

impl RpcResponse {
    pub fn into_result(self) -> Result<serde_json::Value, McpError> {
        if let Some(e) = self.error {
            return Err(McpError::Rpc {
                code: e.code,
                message: e.message,
            });
        }
        Ok(self.result.unwrap_or(serde_json::Value::Null))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpToolDef {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<McpToolDef>,
}

/// 解析 tools/list 结果
pub fn parse_tool_list(result: serde_json::Value) -> Result<Vec<ToolSpec>, McpError> {
    let parsed: ListToolsResult =
        serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;
    Ok(parsed
        .tools
        .into_iter()
        .map(|t| ToolSpec::new(t.name, t.description.unwrap_or_default(), t.input_schema))
        .collect())
}

/// 解析 tools/call 结果：全部为文本块时拼接为字符串，否则原样返回；isError 时转为错误
pub fn parse_call_result(tool: &str, result: serde_json::Value) -> Result<serde_json::Value, McpError> {
    let texts: Option<Vec<&str>> = result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| blocks.iter().filter_map(|b| b.get("text").and_then(|t| t.as_str())).collect());
    let is_error = result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false);
    let all_text = result
        .get("content")
        .and_then(|c| c.as_array())
        .is_some_and(|blocks| blocks.iter().all(|b| b.get("type").and_then(|t| t.as_str()) == Some("text")));

    if is_error {
        return Err(McpError::ToolFailed {
            tool: tool.to_string(),
            message: texts.map(|t| t.join("\n")).unwrap_or_else(|| result.to_string()),
        });
    }
    match texts {
        Some(t) if all_text => Ok(serde_json::Value::String(t.join("\n"))),
        _ => Ok(result),
    }
}

struct StdioPipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// 单个 stdio MCP server 连接
pub struct McpStdioClient {
    name: String,
    pipes: Mutex<StdioPipes>,
    next_id: AtomicU64,
    _child: Child,
}

impl McpStdioClient {
    /// 启动子进程并完成握手
    pub async fn connect(name: &str, command: &str, args: &[String]) -> Result<Self, McpError> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Spawn {
                server: name.to_string(),
                reason: e.to_string(),
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(McpError::Spawn {
                server: name.to_string(),
                reason: "stdio not captured".to_string(),
            });
        };
        let client = Self {
            name: name.to_string(),
            pipes: Mutex::new(StdioPipes {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            next_id: AtomicU64::new(1),
            _child: child,
        };
        let id = client.next_id.fetch_add(1, Ordering::Relaxed);
        client.request(RpcRequest::initialize(id)).await?;
        client
            .send(&RpcRequest::notification("notifications/initialized"))
            .await?;
        tracing::info!(server = %name, "MCP server connected");
        Ok(client)
    }

    async fn send(&self, req: &RpcRequest) -> Result<(), McpError> {
        let mut line = serde_json::to_string(req).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push('\n');
        let mut pipes = self.pipes.lock().await;
        pipes.stdin.write_all(line.as_bytes()).await?;
        pipes.stdin.flush().await?;
        Ok(())
    }

    /// 发送请求并读取同 id 的响应；中间收到的通知忽略
    async fn request(&self, req: RpcRequest) -> Result<serde_json::Value, McpError> {
        let id = req.id;
        let mut line = serde_json::to_string(&req).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push('\n');

        let mut pipes = self.pipes.lock().await;
        pipes.stdin.write_all(line.as_bytes()).await?;
        pipes.stdin.flush().await?;
        loop {
            let mut buf = String::new();
            if pipes.stdout.read_line(&mut buf).await? == 0 {
                return Err(McpError::Protocol(format!("server {} closed stdout", self.name)));
            }
            let buf = buf.trim();
            if buf.is_empty() {
                continue;
            }
            let Ok(resp) = serde_json::from_str::<RpcResponse>(buf) else {
                tracing::debug!(server = %self.name, line = %buf, "skip non JSON-RPC line");
                continue;
            };
            if resp.id.is_some() && resp.id == id {
                return resp.into_result();
            }
        }
    }
}

#[async_trait]
impl ExternalToolServer for McpStdioClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        parse_tool_list(self.request(RpcRequest::list_tools(id)).await?)
    }

    async fn call_tool(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let result = self.request(RpcRequest::call_tool(id, name, args)).await?;
        parse_call_result(name, result)
    }
}

/// 多个外部工具服务的聚合：按工具名路由
#[derive(Default)]
pub struct McpHub {
    servers: Vec<(String, Arc<dyn ExternalToolServer>)>,
    routes: RwLock<HashMap<String, usize>>,
}

impl McpHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, name: impl Into<String>, server: Arc<dyn ExternalToolServer>) -> Self {
        self.servers.push((name.into(), server));
        self
    }

    /// 按配置逐个连接 stdio server；失败的跳过
    pub async fn connect_all<'a>(
        servers: impl IntoIterator<Item = (&'a String, &'a String, &'a [String])>,
    ) -> Self {
        let mut hub = Self::new();
        for (name, command, args) in servers {
            match McpStdioClient::connect(name, command, args).await {
                Ok(client) => hub = hub.with_server(name.clone(), Arc::new(client)),
                Err(e) => tracing::warn!(server = %name, error = %e, "MCP server connect failed, skipped"),
            }
        }
        hub
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[async_trait]
impl ExternalToolServer for McpHub {
    /// 汇总所有 server 的工具并刷新路由表；同名工具以先配置的 server 为准
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        let mut all = Vec::new();
        let mut routes = HashMap::new();
        for (i, (name, server)) in self.servers.iter().enumerate() {
            match server.list_tools().await {
                Ok(tools) => {
                    for t in tools {
                        if routes.contains_key(&t.name) {
                            continue;
                        }
                        routes.insert(t.name.clone(), i);
                        all.push(t);
                    }
                }
                Err(e) => tracing::warn!(server = %name, error = %e, "MCP list tools failed"),
            }
        }
        *self.routes.write().await = routes;
        Ok(all)
    }

    async fn call_tool(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, McpError> {
        let mut route = self.routes.read().await.get(name).copied();
        if route.is_none() {
            self.list_tools().await?;
            route = self.routes.read().await.get(name).copied();
        }
        let (_, server) = route
            .and_then(|i| self.servers.get(i))
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;
        server.call_tool(name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeServer {
        tools: Vec<&'static str>,
        tag: &'static str,
    }

    #[async_trait]
    impl ExternalToolServer for FakeServer {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
            Ok(self
                .tools
                .iter()
                .map(|t| ToolSpec::new(*t, "", serde_json::Value::Null))
                .collect())
        }

        async fn call_tool(&self, name: &str, _args: serde_json::Value) -> Result<serde_json::Value, McpError> {
            Ok(serde_json::json!(format!("{}:{}", self.tag, name)))
        }
    }

    #[tokio::test]
    async fn test_hub_routes_by_tool_name() {
        let hub = McpHub::new()
            .with_server("a", Arc::new(FakeServer { tools: vec!["search", "fetch"], tag: "a" }))
            .with_server("b", Arc::new(FakeServer { tools: vec!["search", "weather"], tag: "b" }));
        let tools = hub.list_tools().await.unwrap();
        assert_eq!(tools.len(), 3);
        assert_eq!(hub.call_tool("search", serde_json::json!({})).await.unwrap(), "a:search");
        assert_eq!(hub.call_tool("weather", serde_json::json!({})).await.unwrap(), "b:weather");
        assert!(matches!(
            hub.call_tool("nope", serde_json::json!({})).await,
            Err(McpError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_request_shapes() {
        let req = serde_json::to_value(RpcRequest::call_tool(3, "search", serde_json::json!({"q": "rust"}))).unwrap();
        assert_eq!(req["jsonrpc"], "2.0");
        assert_eq!(req["method"], "tools/call");
        assert_eq!(req["params"]["arguments"]["q"], "rust");

        let note = serde_json::to_value(RpcRequest::notification("notifications/initialized")).unwrap();
        assert!(note.get("id").is_none());
    }

    #[test]
    fn test_parse_results() {
        let tools = parse_tool_list(serde_json::json!({
            "tools": [{"name": "search", "description": "web", "inputSchema": {"type": "object"}}]
        }))
        .unwrap();
        assert_eq!(tools[0].input_schema["type"], "object");

        let ok = parse_call_result(
            "search",
            serde_json::json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}),
        )
        .unwrap();
        assert_eq!(ok, "a\nb");

        let err = parse_call_result(
            "search",
            serde_json::json!({"content": [{"type": "text", "text": "bad"}], "isError": true}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad"));

        let rpc = RpcResponse {
            id: Some(1),
            result: None,
            error: Some(RpcErrorBody { code: -32601, message: "no method".into() }),
        };
        assert!(matches!(rpc.into_result(), Err(McpError::Rpc { code: -32601, .. })));
    }
}
