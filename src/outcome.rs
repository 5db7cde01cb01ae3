//! Uniform result shape for both invokers, and its rendering into MCP
//! content.
//!
//! A `CommandResult` is created fresh per call and owned by the caller after
//! return. Either `data` or `error` is set, never both. `to_response` is pure
//! formatting: it never changes `success`/`error` semantics, only renders
//! them into the content blocks the tool-protocol transport expects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::ServiceError;
use crate::mcp::protocol::ToolContent;

/// Normalized outcome of a CLI or Graph invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Whether the invocation succeeded.
    pub success: bool,

    /// Structured payload on success (raw text for CLI, parsed JSON for
    /// Graph). Absent for bodyless successes such as HTTP 204.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Raw diagnostic payload (parsed error body, exit code).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,

    /// True when the remediation is to re-authenticate rather than retry.
    #[serde(default)]
    pub auth_required: bool,

    /// Human-readable remediation steps, present when `auth_required`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl CommandResult {
    /// Success with a structured payload.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_details: None,
            auth_required: false,
            instructions: None,
        }
    }

    /// Success with raw textual output (CLI path).
    pub fn ok_text(text: impl Into<String>) -> Self {
        Self::ok(Value::String(text.into()))
    }

    /// Success without a payload (e.g. HTTP 204).
    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            error_details: None,
            auth_required: false,
            instructions: None,
        }
    }

    /// Plain failure.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            error_details: None,
            auth_required: false,
            instructions: None,
        }
    }

    /// Failure carrying the raw diagnostic payload.
    pub fn fail_with_details(error: impl Into<String>, details: Value) -> Self {
        Self {
            error_details: Some(details),
            ..Self::fail(error)
        }
    }

    /// Auth challenge with remediation instructions.
    pub fn needs_auth(error: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            auth_required: true,
            instructions: Some(instructions.into()),
            ..Self::fail(error)
        }
    }

    /// Deadline expiry. Partial output is discarded, not returned.
    pub fn timed_out(deadline: Duration) -> Self {
        Self::fail(format!("timeout after {}s", deadline.as_secs()))
    }
}

impl From<ServiceError> for CommandResult {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Timeout(deadline) => Self::timed_out(deadline),
            ServiceError::AuthRequired { instructions } => {
                Self::needs_auth("authentication required", instructions)
            }
            other => Self::fail(other.to_string()),
        }
    }
}

/// Which tool call produced a result, for rendering context.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// HTTP method for Graph calls, "CLI" for Azure CLI commands.
    pub method: String,
    /// Graph endpoint or the raw CLI command string.
    pub endpoint: String,
}

impl CallContext {
    pub fn cli(command: impl Into<String>) -> Self {
        Self {
            method: "CLI".to_string(),
            endpoint: command.into(),
        }
    }

    pub fn graph(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Render a `CommandResult` into MCP text content.
pub fn to_response(result: &CommandResult, context: &CallContext) -> Vec<ToolContent> {
    let mut text = if result.success {
        let mut text = format!("✅ **Success** ({} {})\n\n", context.method, context.endpoint);
        match &result.data {
            Some(Value::String(raw)) => text.push_str(raw),
            Some(data) => {
                let rendered =
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
                text.push_str(&format!("```json\n{rendered}\n```"));
            }
            None => text.push_str("Operation completed successfully."),
        }
        text
    } else {
        let mut text = format!("❌ **Error** ({} {})\n\n", context.method, context.endpoint);
        text.push_str(&format!(
            "**Error:** {}\n\n",
            result.error.as_deref().unwrap_or("Unknown error")
        ));
        if result.auth_required {
            if let Some(instructions) = &result.instructions {
                text.push_str(&format!("**Instructions:**\n{instructions}\n\n"));
            }
        }
        if let Some(details) = &result.error_details {
            let rendered =
                serde_json::to_string_pretty(details).unwrap_or_else(|_| details.to_string());
            text.push_str(&format!("**Details:**\n```json\n{rendered}\n```"));
        }
        text
    };
    while text.ends_with('\n') {
        text.pop();
    }
    vec![ToolContent::text(text)]
}
