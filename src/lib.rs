//! Unified Microsoft MCP Server
//!
//! A Model Context Protocol server exposing two Microsoft surfaces through
//! one stdio endpoint: Azure CLI command execution (subprocess) and the
//! Microsoft Graph API (HTTP). Both paths share the same shape: validate,
//! bound concurrency, enforce a deadline, and normalize the outcome into a
//! uniform result the tool layer renders.

pub mod azure_cli;
pub mod error;
pub mod graph;
pub mod limiter;
pub mod mcp;
pub mod outcome;
pub mod sanitize;
pub mod settings;

pub use azure_cli::AzureCliInvoker;
pub use error::ServiceError;
pub use graph::GraphInvoker;
pub use limiter::ExecutionLimiter;
pub use mcp::McpServer;
pub use outcome::CommandResult;
pub use sanitize::CommandSanitizer;
pub use settings::Settings;
