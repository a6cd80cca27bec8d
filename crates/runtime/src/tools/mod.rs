//! Tool hosts and the contract they share.

mod builtin;
mod composer;
mod context;
mod empty;
mod errors;
mod host;
mod mcp_host;
mod sandbox_host;
mod types;

pub use builtin::{BuiltinTool, BuiltinToolHost, CurrentTimeTool, EchoTool};
pub use composer::ToolComposer;
pub use context::{ForwardTarget, ToolContext, UpdateSink};
pub use empty::EmptyToolHost;
pub use errors::ToolError;
pub use host::ToolHost;
pub use mcp_host::McpToolHost;
pub use sandbox_host::SandboxToolHost;
pub use types::ToolSpec;
