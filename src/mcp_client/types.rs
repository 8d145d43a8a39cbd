//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types and MCP protocol structures.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision sent in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client identity announced during the handshake.
pub const CLIENT_NAME: &str = "mcp-fleet";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Outbound JSON-RPC 2.0 response, used to answer server-initiated requests.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any inbound line from a server, before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// An inbound message sorted by the fields it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to one of our requests.
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<JsonRpcError>,
    },
    /// Fire-and-forget message from the server.
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Server-initiated request that expects a reply.
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    /// Anything else; carries a short description for logging.
    Invalid(String),
}

impl JsonRpcMessage {
    /// Classify the message: method without id is a notification, method with
    /// id a server request, id without method a response.
    pub fn classify(self) -> Incoming {
        match (self.method, self.id) {
            (Some(method), None) => Incoming::Notification {
                method,
                params: self.params,
            },
            (Some(method), Some(id)) => Incoming::Request {
                id,
                method,
                params: self.params,
            },
            (None, Some(id)) => match id.as_u64() {
                Some(id) => Incoming::Response {
                    id,
                    result: self.result,
                    error: self.error,
                },
                None => Incoming::Invalid(format!("non-numeric response id: {id}")),
            },
            (None, None) => Incoming::Invalid("message has neither id nor method".into()),
        }
    }
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// Capabilities a server declared in its `initialize` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerCapabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
    pub logging: bool,
}

impl ServerCapabilities {
    /// Read the capability flags from the raw `capabilities` object.
    ///
    /// A capability counts as supported when its key is present and not `null`.
    pub fn from_value(value: &Value) -> Self {
        let declared = |key: &str| value.get(key).is_some_and(|v| !v.is_null());
        Self {
            tools: declared("tools"),
            resources: declared("resources"),
            prompts: declared("prompts"),
            logging: declared("logging"),
        }
    }

    pub fn supports(&self, kind: CapabilityKind) -> bool {
        match kind {
            CapabilityKind::Tools => self.tools,
            CapabilityKind::Resources => self.resources,
            CapabilityKind::Prompts => self.prompts,
        }
    }
}

/// The three discoverable capability lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tools,
    Resources,
    Prompts,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::Tools,
        CapabilityKind::Resources,
        CapabilityKind::Prompts,
    ];

    /// The `*/list` method used to discover this capability.
    pub fn list_method(self) -> &'static str {
        match self {
            CapabilityKind::Tools => "tools/list",
            CapabilityKind::Resources => "resources/list",
            CapabilityKind::Prompts => "prompts/list",
        }
    }

    /// Key of the array in the `*/list` result.
    pub fn result_key(self) -> &'static str {
        match self {
            CapabilityKind::Tools => "tools",
            CapabilityKind::Resources => "resources",
            CapabilityKind::Prompts => "prompts",
        }
    }

    /// Map a `notifications/*/list_changed` method to its capability.
    pub fn from_list_changed(method: &str) -> Option<Self> {
        match method {
            "notifications/tools/list_changed" => Some(CapabilityKind::Tools),
            "notifications/resources/list_changed" => Some(CapabilityKind::Resources),
            "notifications/prompts/list_changed" => Some(CapabilityKind::Prompts),
            _ => None,
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.result_key())
    }
}

/// MCP tool definition as returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
}

/// MCP resource descriptor as returned by `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        rename = "mimeType",
        alias = "mime_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub mime_type: Option<String>,
}

/// MCP prompt template descriptor as returned by `prompts/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// One declared argument of a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion", alias = "protocol_version")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, rename = "serverInfo", alias = "server_info")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// Everything a client learned about its server: declared capabilities,
/// identity and the discovered lists.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapabilitySnapshot {
    pub capabilities: ServerCapabilities,
    pub server_info: Option<ServerInfo>,
    pub protocol_version: Option<String>,
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub prompts: Vec<Prompt>,
}

impl CapabilitySnapshot {
    /// Replace one discovered list with raw `*/list` items.
    ///
    /// Items that do not match the expected shape are skipped. Returns the
    /// number of items stored.
    pub fn apply(&mut self, kind: CapabilityKind, items: Vec<Value>) -> usize {
        match kind {
            CapabilityKind::Tools => {
                self.tools = parse_items(kind, items);
                self.tools.len()
            }
            CapabilityKind::Resources => {
                self.resources = parse_items(kind, items);
                self.resources.len()
            }
            CapabilityKind::Prompts => {
                self.prompts = parse_items(kind, items);
                self.prompts.len()
            }
        }
    }
}

fn parse_items<T: DeserializeOwned>(kind: CapabilityKind, items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "skipping malformed list entry");
                None
            }
        })
        .collect()
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

/// Connection lifecycle of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Starting,
    Connected,
    Error,
    Stopping,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Starting => "starting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

// ─── Operation Results ───────────────────────────────────────────────────────

/// Uniform outcome of a tool call, resource read or prompt execution.
///
/// Failures of any kind (transport, timeout, server error, not connected) are
/// reported here instead of being returned as errors.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub content: Option<Value>,
    pub is_error: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl OperationResult {
    /// A failed operation with the given message.
    pub fn failure(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            content: None,
            is_error: true,
            error: Some(message.into()),
            duration_ms,
        }
    }

    /// Convert a `tools/call` result. `isError: true` marks a tool-level failure.
    pub fn from_tool_result(result: Value, duration_ms: u64) -> Self {
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let content = match result.get("content") {
            Some(content) => content.clone(),
            None => result,
        };
        Self {
            success: !is_error,
            error: is_error.then(|| describe_tool_error(&content)),
            content: Some(content),
            is_error,
            duration_ms,
        }
    }

    /// Convert a `resources/read` result, unwrapping the `contents` array.
    pub fn from_resource_result(result: Value, duration_ms: u64) -> Self {
        let content = match result.get("contents") {
            Some(contents) => contents.clone(),
            None => result,
        };
        Self::payload(content, duration_ms)
    }

    /// Wrap a payload verbatim (used for `prompts/get`).
    pub fn payload(content: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            content: Some(content),
            is_error: false,
            error: None,
            duration_ms,
        }
    }
}

/// Pull a readable message out of an error-flagged tool result.
fn describe_tool_error(content: &Value) -> String {
    let text = content
        .as_array()
        .and_then(|items| items.iter().find_map(|item| item.get("text")))
        .and_then(Value::as_str)
        .or_else(|| content.as_str());
    match text {
        Some(text) => text.to_string(),
        None => "tool reported an error".to_string(),
    }
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// JSON-RPC error codes used on either side of a connection.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        // params should be omitted when None
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_value(&note).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["method"], "notifications/initialized");
    }

    #[test]
    fn test_classify_response() {
        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "id": 7, "result": {"tools": []}}"#)
                .unwrap();
        match msg.classify() {
            Incoming::Response { id, result, error } => {
                assert_eq!(id, 7);
                assert!(result.is_some());
                assert!(error.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_error_response() {
        let msg: JsonRpcMessage = serde_json::from_str(
            r#"{"jsonrpc": "2.0", "id": 2, "error": {"code": -32601, "message": "Method not found"}}"#,
        )
        .unwrap();
        match msg.classify() {
            Incoming::Response { error: Some(err), .. } => {
                assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_notification_and_request() {
        let note: JsonRpcMessage = serde_json::from_str(
            r#"{"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}"#,
        )
        .unwrap();
        assert!(matches!(note.classify(), Incoming::Notification { .. }));

        let req: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "id": "abc", "method": "ping"}"#).unwrap();
        assert!(matches!(req.classify(), Incoming::Request { .. }));
    }

    #[test]
    fn test_classify_invalid() {
        let msg: JsonRpcMessage = serde_json::from_str(r#"{"jsonrpc": "2.0"}"#).unwrap();
        assert!(matches!(msg.classify(), Incoming::Invalid(_)));

        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "id": "x", "result": 1}"#).unwrap();
        assert!(matches!(msg.classify(), Incoming::Invalid(_)));
    }

    #[test]
    fn test_server_capabilities_from_value() {
        let caps = ServerCapabilities::from_value(&json!({
            "tools": {"listChanged": true},
            "prompts": {},
            "resources": null
        }));
        assert!(caps.tools);
        assert!(caps.prompts);
        assert!(!caps.resources);
        assert!(!caps.logging);
    }

    #[test]
    fn test_list_changed_mapping() {
        assert_eq!(
            CapabilityKind::from_list_changed("notifications/resources/list_changed"),
            Some(CapabilityKind::Resources)
        );
        assert_eq!(CapabilityKind::from_list_changed("notifications/message"), None);
    }

    #[test]
    fn test_snapshot_apply_skips_malformed() {
        let mut snapshot = CapabilitySnapshot::default();
        let stored = snapshot.apply(
            CapabilityKind::Tools,
            vec![
                json!({"name": "sum", "inputSchema": {"type": "object"}}),
                json!({"description": "missing name"}),
            ],
        );
        assert_eq!(stored, 1);
        assert_eq!(snapshot.tools[0].name, "sum");
        assert_eq!(snapshot.tools[0].input_schema["type"], "object");
    }

    #[test]
    fn test_resource_mime_type_alias() {
        let res: Resource = serde_json::from_value(json!({
            "uri": "file:///readme.md",
            "name": "readme",
            "mimeType": "text/markdown"
        }))
        .unwrap();
        assert_eq!(res.mime_type.as_deref(), Some("text/markdown"));
    }

    #[test]
    fn test_tool_result_success() {
        let result = OperationResult::from_tool_result(json!({"content": 5}), 3);
        assert!(result.success);
        assert!(!result.is_error);
        assert_eq!(result.content, Some(json!(5)));
        assert_eq!(result.duration_ms, 3);
    }

    #[test]
    fn test_tool_result_is_error() {
        let result = OperationResult::from_tool_result(
            json!({"content": [{"type": "text", "text": "division by zero"}], "isError": true}),
            1,
        );
        assert!(!result.success);
        assert!(result.is_error);
        assert_eq!(result.error.as_deref(), Some("division by zero"));
    }

    #[test]
    fn test_resource_result_unwraps_contents() {
        let result = OperationResult::from_resource_result(
            json!({"contents": [{"uri": "mem://a", "text": "hi"}]}),
            0,
        );
        assert_eq!(result.content.unwrap()[0]["text"], "hi");
    }
}
