//! MCP (Model Context Protocol) client library.
//!
//! This crate provides a client for communicating with MCP servers over
//! stdio using `Content-Length` framed JSON-RPC messages.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Server, ServerConfig};
//!
//! # async fn example() -> mcp::Result<()> {
//! let config = ServerConfig::new("mcp-filesystem")
//!     .with_name("filesystem")
//!     .with_args(["--root", "./workspace"]);
//!
//! let server = Server::spawn(config).await;
//!
//! for tool in server.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let text = server.call_tool("read_file", r#"{"path": "./README.md"}"#).await?;
//! println!("{text}");
//!
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod framing;
mod protocol;
mod server;

pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, Incoming, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, ListToolsResult, PROTOCOL_VERSION, ServerCapabilities,
    ServerInfo, Tool, ToolContent,
};
pub use server::{Server, ServerConfig, ServerState};
