//! Tool execution runtime.
//!
//! Tools are reached through the [`ToolHost`] trait. The crate provides:
//!
//! - **Workspace resolution**: maps a session onto a directory and keeps
//!   every path inside it ([`workspace`]).
//! - **Sandboxed execution**: file operations, search and shell commands in
//!   a session workspace ([`SandboxExecutor`]).
//! - **Hosts**: built-in tools, the sandbox, and MCP servers, each behind
//!   [`ToolHost`].
//! - **Composition**: [`ToolComposer`] merges hosts and scopes them by
//!   capability policy.
//! - **Sidecar**: a JSON-lines request boundary over the sandbox ([`Sidecar`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use runtime::{
//!     BuiltinToolHost, SandboxConfig, SandboxExecutor, SandboxToolHost, ToolComposer,
//!     ToolContext, ToolHost,
//! };
//!
//! # async fn example() -> Result<(), runtime::ToolError> {
//! let sandbox = SandboxToolHost::new(SandboxExecutor::new(SandboxConfig::new("./workspaces")));
//! let composer = ToolComposer::new()
//!     .with_host("builtin", Arc::new(BuiltinToolHost::with_defaults()))
//!     .with_host("sandbox", Arc::new(sandbox));
//!
//! let ctx = ToolContext::new("session-1");
//! composer.call_tool("write", r#"{"path":"hello.txt","content":"hi"}"#, &ctx).await?;
//! let listing = composer.call_tool("ls", "{}", &ctx).await?;
//! println!("{listing}");
//! # Ok(())
//! # }
//! ```

mod error;
pub mod sandbox;
mod sidecar;
pub mod tools;
pub mod workspace;

pub use error::{Error, Result};
pub use sandbox::{GrepBackend, SandboxConfig, SandboxExecutor};
pub use sidecar::Sidecar;
pub use tools::{
    BuiltinTool, BuiltinToolHost, EmptyToolHost, McpToolHost, SandboxToolHost, ToolComposer,
    ToolContext, ToolError, ToolHost, ToolSpec,
};
pub use workspace::WorkspaceMode;
