//! MCP wire types (JSON-RPC 2.0)

use mcp_chat_core::{ToolContent, ToolDescriptor, ToolOutput};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Result, RuntimeError};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const CLIENT_NAME: &str = "mcp-chat";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub const fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcNotification<'a> {
    pub const fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Unwrap the result, turning an error object into `RuntimeError::Rpc`
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            let message = match error.data {
                Some(data) if !data.is_null() => format!("{} ({data})", error.message),
                _ => error.message,
            };
            return Err(RuntimeError::Rpc {
                code: error.code,
                message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Anything the server may send us
#[derive(Debug)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    Notification { method: String },
    Request { id: Value, method: String },
}

/// Classify one JSON-RPC message by the fields it carries
pub fn parse_incoming(text: &str) -> Result<IncomingMessage> {
    let value: Value = serde_json::from_str(text)?;
    let Some(object) = value.as_object() else {
        return Err(RuntimeError::Protocol(format!("expected a JSON object, got: {text}")));
    };

    match (object.get("method").and_then(Value::as_str), object.get("id")) {
        (Some(method), Some(id)) if !id.is_null() => Ok(IncomingMessage::Request {
            id: id.clone(),
            method: method.to_string(),
        }),
        (Some(method), _) => Ok(IncomingMessage::Notification {
            method: method.to_string(),
        }),
        (None, _) => Ok(IncomingMessage::Response(serde_json::from_value(value)?)),
    }
}

/// Reply to a server-initiated request. Only `ping` is supported.
pub fn reply_to_server_request(id: &Value, method: &str) -> Value {
    if method == "ping" {
        json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": {} })
    } else {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "error": {
                "code": crate::error::METHOD_NOT_FOUND,
                "message": format!("client does not support '{method}'")
            }
        })
    }
}

pub fn initialize_params(client_version: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": { "name": CLIENT_NAME, "version": client_version }
    })
}

/// What the server told us about itself during `initialize`
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: ServerInfo,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl InitializeResult {
    pub fn supports_tools(&self) -> bool {
        self.capabilities.get("tools").is_some()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

/// One page of `tools/list`
#[derive(Debug)]
pub struct ToolsPage {
    pub tools: Vec<ToolDescriptor>,
    pub next_cursor: Option<String>,
}

pub fn parse_tools_page(result: Value) -> Result<ToolsPage> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Page {
        #[serde(default)]
        tools: Vec<WireTool>,
        #[serde(default)]
        next_cursor: Option<String>,
    }

    let page: Page = serde_json::from_value(result)?;
    let tools = page
        .tools
        .into_iter()
        .map(|t| {
            ToolDescriptor::new(
                t.name,
                t.description.unwrap_or_default(),
                t.input_schema
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            )
        })
        .collect();

    Ok(ToolsPage {
        tools,
        next_cursor: page.next_cursor.filter(|c| !c.is_empty()),
    })
}

pub fn tools_list_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|c| json!({ "cursor": c }))
}

pub fn tools_call_params(name: &str, arguments: Map<String, Value>) -> Value {
    json!({ "name": name, "arguments": arguments })
}

/// Normalize a `tools/call` result
pub fn parse_call_result(result: &Value) -> ToolOutput {
    let content = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| blocks.iter().map(parse_content_block).collect())
        .unwrap_or_default();

    ToolOutput {
        content,
        is_error: result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        structured: result.get("structuredContent").cloned(),
    }
}

fn parse_content_block(block: &Value) -> ToolContent {
    let kind = block.get("type").and_then(Value::as_str).unwrap_or_default();
    let str_field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);

    match kind {
        "text" => ToolContent::Text {
            text: str_field(block, "text").unwrap_or_default(),
        },
        "image" | "audio" => ToolContent::Image {
            mime_type: str_field(block, "mimeType").unwrap_or_else(|| kind.to_string()),
        },
        "resource" => {
            let resource = block.get("resource").unwrap_or(&Value::Null);
            ToolContent::Resource {
                uri: str_field(resource, "uri").unwrap_or_default(),
                text: str_field(resource, "text"),
            }
        }
        "resource_link" => ToolContent::Resource {
            uri: str_field(block, "uri").unwrap_or_default(),
            text: str_field(block, "description"),
        },
        _ => ToolContent::Text {
            text: block.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_incoming_kinds() {
        let response = parse_incoming(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#).unwrap();
        assert!(matches!(response, IncomingMessage::Response(r) if r.id == json!(3)));

        let note = parse_incoming(r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#)
            .unwrap();
        assert!(matches!(note, IncomingMessage::Notification { method } if method.ends_with("list_changed")));

        let request = parse_incoming(r#"{"jsonrpc":"2.0","id":"s1","method":"ping"}"#).unwrap();
        assert!(matches!(request, IncomingMessage::Request { method, .. } if method == "ping"));

        assert!(parse_incoming("[1,2]").is_err());
    }

    #[test]
    fn test_error_response() {
        let msg = parse_incoming(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Unknown tool: nope"}}"#,
        )
        .unwrap();
        let IncomingMessage::Response(response) = msg else {
            panic!("expected response");
        };
        match response.into_result() {
            Err(RuntimeError::Rpc { code, message }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "Unknown tool: nope");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_tools_page() {
        let page = parse_tools_page(json!({
            "tools": [
                {"name": "get_alerts", "description": "Get weather alerts for a US state.",
                 "inputSchema": {"type": "object", "properties": {"state": {"type": "string"}}}},
                {"name": "ping"}
            ],
            "nextCursor": "page-2"
        }))
        .unwrap();

        assert_eq!(page.tools.len(), 2);
        assert_eq!(page.tools[0].name, "get_alerts");
        assert_eq!(page.tools[1].input_schema["type"], "object");
        assert_eq!(page.next_cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_parse_call_result() {
        let output = parse_call_result(&json!({
            "content": [
                {"type": "text", "text": "Event: Winter Storm"},
                {"type": "resource", "resource": {"uri": "file:///a.txt", "text": "body"}}
            ],
            "isError": false
        }));
        assert!(!output.is_error);
        assert_eq!(output.render(), "Event: Winter Storm\n[resource file:///a.txt]\nbody");

        let failed = parse_call_result(&json!({
            "content": [{"type": "text", "text": "state must be two letters"}],
            "isError": true
        }));
        assert!(failed.is_error);
    }

    #[test]
    fn test_ping_reply() {
        let reply = reply_to_server_request(&json!(9), "ping");
        assert_eq!(reply["id"], 9);
        assert!(reply.get("error").is_none());

        let reply = reply_to_server_request(&json!(10), "sampling/createMessage");
        assert_eq!(reply["error"]["code"], -32601);
    }
}
