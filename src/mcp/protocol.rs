//! MCP protocol types (JSON-RPC 2.0).
//!
//! The Model Context Protocol is built on JSON-RPC 2.0. This module owns
//! serialization and deserialization of the wire messages plus the static
//! tool and resource catalogs; transport concerns (newline-delimited stdio)
//! live in the server module.
//!
//! - JSON-RPC 2.0: <https://www.jsonrpc.org/specification>
//! - MCP Spec: <https://modelcontextprotocol.io/specification/2025-03-26>

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision this server implements.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// A JSON-RPC 2.0 request message.
///
/// The id is kept as raw JSON: clients may use numbers or strings, and the
/// response must echo it untouched. A missing id marks a notification, which
/// never receives a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpRequest {
    pub jsonrpc: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// True when the message expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response message.
///
/// Carries either `result` or `error`, never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpResponse {
    pub jsonrpc: String,

    pub id: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: McpError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpError {
    pub code: i32,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Parse error (-32700): invalid JSON was received.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(-32700, message)
    }

    /// Invalid request (-32600): not a valid request object.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(-32600, message)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(-32601, format!("Method not found: {}", method.into()))
    }

    /// Invalid params (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }
}

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[Error {}] {}", self.code, self.message)
    }
}

impl std::error::Error for McpError {}

/// One block of tool output. Only the `text` content type is produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// A tool advertised through `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A resource advertised through `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// The two tools this server exposes.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: "execute_azure_cli_command".to_string(),
            description: "Execute an Azure CLI command and return its output. The command \
                          must start with 'az'. Uses service-principal credentials from the \
                          environment when configured, otherwise the CLI's existing login."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Complete Azure CLI command to execute (must start with 'az')"
                    }
                },
                "required": ["command"]
            }),
        },
        Tool {
            name: "graph_command".to_string(),
            description: "Call the Microsoft Graph API. Supply an endpoint relative to \
                          https://graph.microsoft.com/v1.0 (for example 'me' or 'users'), \
                          an optional HTTP method (default GET), an optional JSON body, and \
                          an optional client secret for application access."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Graph endpoint relative to the v1.0 base, e.g. 'me' or 'users/{id}'"
                    },
                    "method": {
                        "type": "string",
                        "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"],
                        "description": "HTTP method (default GET)"
                    },
                    "data": {
                        "type": "object",
                        "description": "JSON request body for POST/PUT/PATCH"
                    },
                    "client_secret": {
                        "type": "string",
                        "description": "Client secret overriding any environment-configured secret"
                    }
                },
                "required": ["command"]
            }),
        },
    ]
}

/// Help resources advertised through `resources/list`.
pub fn resource_definitions() -> Vec<Resource> {
    vec![
        Resource {
            uri: "azure://help".to_string(),
            name: "Azure CLI Help".to_string(),
            description: "Usage guidance for the execute_azure_cli_command tool".to_string(),
            mime_type: "text/markdown".to_string(),
        },
        Resource {
            uri: "graph://help".to_string(),
            name: "Microsoft Graph Help".to_string(),
            description: "Usage guidance for the graph_command tool".to_string(),
            mime_type: "text/markdown".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let request = McpRequest::new(1u64, "tools/list", Some(json!({})));
        let wire = serde_json::to_string(&request).unwrap();
        let parsed: McpRequest = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, request);
        assert!(!parsed.is_notification());
    }

    #[test]
    fn test_notification_has_no_id() {
        let wire = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let parsed: McpRequest = serde_json::from_str(wire).unwrap();
        assert!(parsed.is_notification());
    }

    #[test]
    fn test_string_ids_are_preserved() {
        let wire = r#"{"jsonrpc":"2.0","id":"abc-1","method":"ping"}"#;
        let parsed: McpRequest = serde_json::from_str(wire).unwrap();
        assert_eq!(parsed.id, Some(Value::String("abc-1".to_string())));
    }

    #[test]
    fn test_response_carries_result_xor_error() {
        let ok = McpResponse::ok(json!(1), json!({"tools": []}));
        assert!(ok.is_success());
        assert!(ok.error.is_none());

        let err = McpResponse::err(json!(1), McpError::method_not_found("nope"));
        assert!(!err.is_success());
        assert_eq!(err.error.unwrap().code, -32601);
    }

    #[test]
    fn test_error_response_omits_result_field() {
        let err = McpResponse::err(json!(2), McpError::invalid_params("missing command"));
        let wire = serde_json::to_string(&err).unwrap();
        assert!(!wire.contains("\"result\""));
        assert!(wire.contains("-32602"));
    }

    #[test]
    fn test_tool_catalog_shape() {
        let tools = tool_definitions();
        assert_eq!(tools.len(), 2);
        for tool in &tools {
            assert_eq!(tool.input_schema["type"], "object");
            assert_eq!(tool.input_schema["required"][0], "command");
        }
        assert_eq!(tools[0].name, "execute_azure_cli_command");
        assert_eq!(tools[1].name, "graph_command");
    }

    #[test]
    fn test_resource_catalog_shape() {
        let resources = resource_definitions();
        let uris: Vec<_> = resources.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris, vec!["azure://help", "graph://help"]);
    }
}
