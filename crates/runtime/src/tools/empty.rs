//! Empty tool host implementation.

use super::{ToolContext, ToolError, ToolHost, ToolSpec};
use async_trait::async_trait;
use serde_json::Value;

/// A tool host with no tools.
///
/// Useful for testing or when tools are not needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyToolHost;

#[async_trait]
impl ToolHost for EmptyToolHost {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(Vec::new())
    }

    async fn call_tool(
        &self,
        name: &str,
        _args: &str,
        _ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        Err(ToolError::unknown_tool(name))
    }
}
