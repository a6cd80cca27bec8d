//! Tool host trait.

use super::{ToolContext, ToolError, ToolSpec};
use async_trait::async_trait;
use serde_json::Value;

/// Trait for tool execution hosts.
///
/// Implementations advertise a catalog and execute calls by name. This is
/// the boundary between the agent loop and side effects.
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Current tool catalog.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    /// Execute a tool. `args` is the raw JSON argument string.
    async fn call_tool(
        &self,
        name: &str,
        args: &str,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError>;
}

/// Parse a raw argument string into `T`. Blank means `{}`.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &str) -> Result<T, ToolError> {
    let args = if args.trim().is_empty() { "{}" } else { args };
    serde_json::from_str(args).map_err(|e| ToolError::invalid_arguments(e.to_string()))
}
