//! In-process tools that need no sandbox or external server.

use super::host::parse_args;
use super::{ToolContext, ToolError, ToolHost, ToolSpec};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// A single in-process tool.
#[async_trait]
pub trait BuiltinTool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn execute(&self, args: &str, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Registry of [`BuiltinTool`]s, in registration order.
#[derive(Clone, Default)]
pub struct BuiltinToolHost {
    tools: Vec<Arc<dyn BuiltinTool>>,
}

impl BuiltinToolHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// `current_time` and `echo`.
    pub fn with_defaults() -> Self {
        Self::new().with_tool(CurrentTimeTool).with_tool(EchoTool)
    }

    pub fn with_tool(mut self, tool: impl BuiltinTool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn BuiltinTool>> {
        self.tools.iter().find(|tool| tool.spec().name == name)
    }
}

impl std::fmt::Debug for BuiltinToolHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.tools.iter().map(|t| t.spec().name).collect();
        f.debug_struct("BuiltinToolHost").field("tools", &names).finish()
    }
}

#[async_trait]
impl ToolHost for BuiltinToolHost {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(self.tools.iter().map(|tool| tool.spec()).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        args: &str,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let tool = self.find(name).ok_or_else(|| ToolError::unknown_tool(name))?;
        debug!(tool = name, session_id = %ctx.session_id, "calling builtin tool");
        tool.execute(args, ctx).await
    }
}

/// Reports the current UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentTimeTool;

#[async_trait]
impl BuiltinTool for CurrentTimeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "current_time",
            "Get the current date and time in UTC.",
            json!({ "type": "object", "properties": {} }),
        )
    }

    async fn execute(&self, _args: &str, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let now = Utc::now();
        Ok(json!({
            "iso": now.to_rfc3339(),
            "unix": now.timestamp(),
            "unixMillis": now.timestamp_millis(),
        }))
    }
}

/// Returns its `text` argument. Handy for wiring checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

#[derive(Deserialize)]
struct EchoArgs {
    text: String,
}

#[async_trait]
impl BuiltinTool for EchoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "echo",
            "Echo the given text back.",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" }
                },
                "required": ["text"]
            }),
        )
    }

    async fn execute(&self, args: &str, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: EchoArgs = parse_args(args)?;
        Ok(Value::String(args.text))
    }
}
