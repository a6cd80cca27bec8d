//! MCP protocol types (JSON-RPC 2.0 based).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision announced in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Option<Value>) -> Self {
        self.params = params;
        self
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// Response we send back for server-initiated requests.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcReply {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcReply {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.code;
        let message = &self.message;
        write!(f, "[{code}] {message}")
    }
}

impl std::error::Error for JsonRpcError {}

/// A decoded message received from the server.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Response to one of our requests.
    ///
    /// `id` is `None` when the server sent something that is not a
    /// non-negative integer; such responses can never match a pending entry.
    Response {
        id: Option<u64>,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Server-initiated request that expects a reply.
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    /// Fire-and-forget notification.
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Valid JSON that is none of the above.
    Invalid(Value),
}

impl Incoming {
    /// Classify a JSON value by the fields it carries.
    pub fn classify(mut value: Value) -> Self {
        let Some(obj) = value.as_object_mut() else {
            return Incoming::Invalid(value);
        };

        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        let id = obj.remove("id");
        let params = obj.remove("params");

        match (method, id) {
            (Some(method), Some(id)) if !id.is_null() => Incoming::Request { id, method, params },
            (Some(method), _) => Incoming::Notification { method, params },
            (None, Some(id)) => {
                let outcome = match obj.remove("error") {
                    Some(err) if !err.is_null() => Err(serde_json::from_value(err)
                        .unwrap_or_else(|e| JsonRpcError {
                            code: -32603,
                            message: format!("malformed error object: {e}"),
                            data: None,
                        })),
                    // Some MCP servers omit `result` for void methods; treat
                    // a missing result as `null` rather than an error.
                    _ => Ok(obj.remove("result").unwrap_or(Value::Null)),
                };
                Incoming::Response {
                    id: id.as_u64(),
                    outcome,
                }
            }
            (None, None) => Incoming::Invalid(value),
        }
    }
}

// --- MCP-specific types ---

/// MCP initialize request params.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "toolhost".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Client capabilities sent during initialization.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientCapabilities {}

/// Client info sent during initialization.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// MCP initialize response result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// Server capabilities returned during initialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

/// Server info returned during initialization.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Tool definition returned by tools/list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Result of tools/list (one page).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Params for tools/call.
#[derive(Debug, Clone, Serialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

/// Result of tools/call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Newline-joined text of every `text` content item.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content returned by a tool. Only text is interpreted.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl ToolContent {
    /// Get text content if this is a text content block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolContent::Text { text } => Some(text),
            ToolContent::Other => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_request() {
        let params = serde_json::to_value(InitializeParams::default()).unwrap();
        let req = JsonRpcRequest::new(1, "initialize").with_params(Some(params));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"initialize\""));
        assert!(json.contains("\"protocolVersion\":\"2024-11-05\""));
    }

    #[test]
    fn notification_has_no_id() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_value(&note).unwrap();
        assert!(json.get("id").is_none());
    }

    #[test]
    fn classify_success_response() {
        let msg = Incoming::classify(json!({"jsonrpc":"2.0","id":1,"result":{"tools":[]}}));
        match msg {
            Incoming::Response { id, outcome } => {
                assert_eq!(id, Some(1));
                assert_eq!(outcome.unwrap(), json!({"tools": []}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classify_error_response() {
        let msg = Incoming::classify(
            json!({"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"nope"}}),
        );
        match msg {
            Incoming::Response { id, outcome } => {
                assert_eq!(id, Some(4));
                assert_eq!(outcome.unwrap_err().code, -32601);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fractional_and_negative_ids_never_match() {
        for raw in [json!(1.5), json!(-3), json!("7")] {
            let msg = Incoming::classify(json!({"jsonrpc":"2.0","id":raw,"result":null}));
            assert!(matches!(msg, Incoming::Response { id: None, .. }));
        }
    }

    #[test]
    fn classify_request_and_notification() {
        let req = Incoming::classify(json!({"jsonrpc":"2.0","id":"a","method":"ping"}));
        assert!(matches!(req, Incoming::Request { ref method, .. } if method == "ping"));

        let note = Incoming::classify(json!({"jsonrpc":"2.0","method":"notifications/progress"}));
        assert!(matches!(note, Incoming::Notification { .. }));

        assert!(matches!(Incoming::classify(json!([1, 2])), Incoming::Invalid(_)));
    }

    #[test]
    fn deserialize_tool() {
        let json = r#"{
            "name": "read_file",
            "description": "Read a file",
            "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}}
        }"#;
        let tool: Tool = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "read_file");
    }

    #[test]
    fn unknown_content_kinds_are_ignored() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "one"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                {"type": "text", "text": "two"}
            ]
        }))
        .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "one\ntwo");
    }
}
