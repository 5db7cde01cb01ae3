//! MCP server: stdio transport and request dispatch.
//!
//! Transport is newline-delimited JSON over stdin/stdout, one message per
//! line. stdout is reserved for protocol frames; all logging goes to stderr.
//! Dispatch is strictly sequential per message read, but tool executions
//! inside a call run under the invokers' own concurrency limits.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::azure_cli::AzureCliInvoker;
use crate::graph::{parse_method, GraphInvoker};
use crate::mcp::protocol::{
    resource_definitions, tool_definitions, McpError, McpRequest, McpResponse,
    MCP_PROTOCOL_VERSION,
};
use crate::outcome::{to_response, CallContext};
use crate::sanitize::CommandSanitizer;
use crate::settings::Settings;

const AZURE_HELP: &str = include_str!("help/azure.md");
const GRAPH_HELP: &str = include_str!("help/graph.md");

/// The unified Azure CLI + Microsoft Graph MCP server.
pub struct McpServer {
    settings: Arc<Settings>,
    sanitizer: CommandSanitizer,
    azure: AzureCliInvoker,
    graph: GraphInvoker,
}

impl McpServer {
    pub fn new(settings: Arc<Settings>) -> Self {
        let azure = AzureCliInvoker::new(settings.clone());
        let graph = GraphInvoker::new(settings.clone());
        Self::with_invokers(settings, azure, graph)
    }

    /// Assemble a server from pre-built invokers. Tests point the invokers at
    /// fake binaries and mock endpoints.
    pub fn with_invokers(
        settings: Arc<Settings>,
        azure: AzureCliInvoker,
        graph: GraphInvoker,
    ) -> Self {
        Self {
            settings,
            sanitizer: CommandSanitizer::azure_cli(),
            azure,
            graph,
        }
    }

    /// Serve MCP over stdin/stdout until the client closes the stream.
    pub async fn serve_stdio(&self) -> anyhow::Result<()> {
        info!(
            read_only_graph = self.settings.is_graph_read_only(),
            cli_slots = self.azure.limiter().max_concurrent(),
            graph_slots = self.graph.limiter().max_concurrent(),
            "MCP server listening on stdio"
        );

        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_message(&line).await {
                let mut frame = serde_json::to_vec(&response)?;
                frame.push(b'\n');
                stdout.write_all(&frame).await?;
                stdout.flush().await?;
            }
        }

        info!("stdin closed, shutting down");
        Ok(())
    }

    /// Handle one wire message. Returns `None` for notifications, which must
    /// not be answered.
    pub async fn handle_message(&self, line: &str) -> Option<McpResponse> {
        let request: McpRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "discarding unparseable message");
                return Some(McpResponse::err(
                    Value::Null,
                    McpError::parse_error(e.to_string()),
                ));
            }
        };

        if request.is_notification() {
            debug!(method = %request.method, "ignoring notification");
            return None;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        if request.jsonrpc != crate::mcp::protocol::JSONRPC_VERSION {
            return Some(McpResponse::err(
                id,
                McpError::invalid_request(format!(
                    "unsupported jsonrpc version {:?}",
                    request.jsonrpc
                )),
            ));
        }
        let response = match self.handle_request(&request).await {
            Ok(result) => McpResponse::ok(id, result),
            Err(err) => {
                error!(method = %request.method, error = %err, "request failed");
                McpResponse::err(id, err)
            }
        };
        Some(response)
    }

    async fn handle_request(&self, request: &McpRequest) -> Result<Value, McpError> {
        match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {},
                    "prompts": {}
                },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tool_definitions() })),
            "tools/call" => self.handle_tool_call(request.params.as_ref()).await,
            "resources/list" => Ok(json!({ "resources": resource_definitions() })),
            "resources/read" => Self::handle_resource_read(request.params.as_ref()),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            other => Err(McpError::method_not_found(other)),
        }
    }

    async fn handle_tool_call(&self, params: Option<&Value>) -> Result<Value, McpError> {
        let params = params.ok_or_else(|| McpError::invalid_params("missing params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing tool name"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        let (result, context) = match name {
            "execute_azure_cli_command" => {
                let command = required_str(&arguments, "command")?;
                let context = CallContext::cli(command);
                let result = match self.sanitizer.sanitize(command) {
                    Ok(sanitized) => self.azure.run(&sanitized).await,
                    Err(err) => err.into(),
                };
                (result, context)
            }
            "graph_command" => {
                let endpoint = required_str(&arguments, "command")?;
                let method_raw = arguments
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or("GET");
                let context = CallContext::graph(method_raw.to_ascii_uppercase(), endpoint);
                let body = arguments.get("data").cloned().filter(|v| !v.is_null());
                let secret = arguments.get("client_secret").and_then(Value::as_str);

                let result = match parse_method(method_raw) {
                    Ok(method) => self.graph.execute(endpoint, method, body, secret).await,
                    Err(err) => err.into(),
                };
                (result, context)
            }
            other => {
                return Err(McpError::invalid_params(format!("unknown tool: {other}")));
            }
        };

        info!(
            tool = name,
            success = result.success,
            auth_required = result.auth_required,
            "tool call completed"
        );

        Ok(json!({
            "content": to_response(&result, &context),
            "isError": !result.success
        }))
    }

    fn handle_resource_read(params: Option<&Value>) -> Result<Value, McpError> {
        let uri = params
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing resource uri"))?;

        let text = match uri {
            "azure://help" => AZURE_HELP,
            "graph://help" => GRAPH_HELP,
            other => {
                return Err(McpError::invalid_params(format!(
                    "unknown resource: {other}"
                )));
            }
        };

        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "text/markdown",
                "text": text
            }]
        }))
    }
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, McpError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| McpError::invalid_params(format!("missing required argument: {key}")))
}
