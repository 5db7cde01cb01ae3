//! Model Context Protocol layer: wire types and the stdio server.

pub mod protocol;
pub mod server;

pub use protocol::{McpError, McpRequest, McpResponse, Resource, Tool, ToolContent};
pub use server::McpServer;
