//! MCP-backed tool host.

use super::{ToolContext, ToolError, ToolHost, ToolSpec};
use async_trait::async_trait;
use mcp::{Server, ServerConfig, Tool};
use policy::Capability;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Tool host backed by one MCP server.
///
/// Every remote tool is tagged with the host's capabilities, by default
/// `mcp` and `mcp:<server>`.
pub struct McpToolHost {
    server: Arc<Server>,
    capabilities: BTreeSet<Capability>,
}

impl McpToolHost {
    /// Spawn the configured server. Spawn failures surface on first use.
    pub async fn spawn(config: ServerConfig) -> Self {
        Self::new(Server::spawn(config).await)
    }

    pub fn new(server: Server) -> Self {
        let capabilities = default_capabilities(server.name());
        Self {
            server: Arc::new(server),
            capabilities,
        }
    }

    /// Replace the capability tags attached to every remote tool.
    pub fn with_capabilities<I, C>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    fn spec(&self, tool: Tool) -> ToolSpec {
        let schema = if tool.input_schema.is_null() {
            json!({ "type": "object", "properties": {} })
        } else {
            tool.input_schema
        };
        ToolSpec::new(tool.name, tool.description.unwrap_or_default(), schema)
            .with_capabilities(self.capabilities.iter().cloned())
    }
}

fn default_capabilities(server: &str) -> BTreeSet<Capability> {
    [Capability::mcp(), Capability::mcp_server(server)]
        .into_iter()
        .collect()
}

impl std::fmt::Debug for McpToolHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolHost")
            .field("server", &self.server.name())
            .field("state", &self.server.state())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[async_trait]
impl ToolHost for McpToolHost {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        let tools = self.server.list_tools().await?;
        Ok(tools.into_iter().map(|tool| self.spec(tool)).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        args: &str,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        debug!(server = %self.server.name(), tool = name, session_id = %ctx.session_id, "calling MCP tool");
        let text = self.server.call_tool(name, args).await?;
        Ok(Value::String(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp::framing::{FrameDecoder, encode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serve a minimal MCP server over an in-memory pipe: one `greet` tool
    /// that echoes its `name` argument.
    fn fake_server(name: &str) -> Server {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (mut read, mut write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = match read.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.push(&buf[..n]);
                for body in decoder.drain_frames() {
                    let msg: Value = serde_json::from_slice(&body).unwrap();
                    let Some(id) = msg.get("id").cloned() else {
                        continue;
                    };
                    let result = match msg["method"].as_str() {
                        Some("initialize") => json!({"protocolVersion": "2024-11-05"}),
                        Some("tools/list") => json!({"tools": [
                            {"name": "greet", "description": "Say hi", "inputSchema": {"type": "object"}}
                        ]}),
                        Some("tools/call") => {
                            let who = msg["params"]["arguments"]["name"].as_str().unwrap_or("?");
                            json!({"content": [{"type": "text", "text": format!("hi {who}")}]})
                        }
                        _ => json!({}),
                    };
                    let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
                    let frame = encode(&serde_json::to_vec(&reply).unwrap());
                    if write.write_all(&frame).await.is_err() {
                        return;
                    }
                }
            }
        });

        Server::connect(name, client_read, client_write)
    }

    #[tokio::test]
    async fn tags_remote_tools_with_server_capabilities() {
        let host = McpToolHost::new(fake_server("files"));
        let tools = host.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "greet");
        assert_eq!(tools[0].description, "Say hi");
        assert_eq!(
            tools[0].capability_tags().collect::<Vec<_>>(),
            ["mcp", "mcp:files"]
        );
    }

    #[tokio::test]
    async fn configured_capabilities_replace_defaults() {
        let host = McpToolHost::new(fake_server("files")).with_capabilities(["fs_read"]);
        let tools = host.list_tools().await.unwrap();
        assert_eq!(tools[0].capability_tags().collect::<Vec<_>>(), ["fs_read"]);
    }

    #[tokio::test]
    async fn returns_joined_text() {
        let host = McpToolHost::new(fake_server("files"));
        let out = host
            .call_tool("greet", r#"{"name":"ada"}"#, &ToolContext::new("s1"))
            .await
            .unwrap();
        assert_eq!(out, json!("hi ada"));
    }

    #[tokio::test]
    async fn lifecycle_errors_keep_their_codes() {
        let host = McpToolHost::spawn(ServerConfig::new("/definitely/not/a/real/binary")).await;
        let err = host.list_tools().await.unwrap_err();
        assert_eq!(err.code(), "mcp_spawn_error");

        let err = host
            .call_tool("x", "[1]", &ToolContext::new("s1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_arguments");
    }
}
