//! JSON request/response boundary over the sandbox tools.
//!
//! Requests look like `{"op": "write", "sessionId": "s1", "path": "a.txt",
//! "content": "hi"}`. Responses are `{"ok": true, "result": ...}` or
//! `{"ok": false, "error": {"code": ..., "message": ...}}`.

use crate::sandbox::SandboxExecutor;
use crate::tools::{SandboxToolHost, ToolContext, ToolError, ToolHost};
use crate::Result;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

const OPS: &[&str] = &["write", "read", "find", "ls", "grep", "bash", "edit"];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    op: String,
    session_id: String,
    #[serde(flatten)]
    args: Map<String, Value>,
}

/// Dispatches sidecar requests to the sandbox tools.
#[derive(Debug, Clone)]
pub struct Sidecar {
    host: SandboxToolHost,
}

impl Sidecar {
    pub fn new(executor: SandboxExecutor) -> Self {
        Self {
            host: SandboxToolHost::new(executor),
        }
    }

    /// Handle one request value and build the response envelope.
    pub async fn handle(&self, request: Value) -> Value {
        match self.dispatch(request).await {
            Ok(result) => json!({ "ok": true, "result": result }),
            Err(e) => json!({
                "ok": false,
                "error": { "code": e.code(), "message": e.to_string() }
            }),
        }
    }

    async fn dispatch(&self, request: Value) -> std::result::Result<Value, ToolError> {
        let request: Request = serde_json::from_value(request)
            .map_err(|e| ToolError::invalid_arguments(format!("invalid request: {e}")))?;

        let op = request.op.strip_prefix('/').unwrap_or(&request.op);
        if !OPS.contains(&op) {
            return Err(ToolError::unknown_tool(op));
        }

        debug!(op, session_id = %request.session_id, "sidecar request");
        let args = Value::Object(request.args).to_string();
        let ctx = ToolContext::new(request.session_id);
        self.host.call_tool(op, &args, &ctx).await
    }

    /// Handle one line of JSON. Unparsable input gets an error envelope.
    pub async fn handle_line(&self, line: &str) -> Value {
        match serde_json::from_str::<Value>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                let err = ToolError::invalid_arguments(format!("invalid JSON: {e}"));
                json!({
                    "ok": false,
                    "error": { "code": err.code(), "message": err.to_string() }
                })
            }
        }
    }

    /// Serve JSON lines until `reader` ends: one request per line, one
    /// response per line, in order.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("sidecar serving");
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line).await;
            let mut bytes = serde_json::to_vec(&response)?;
            bytes.push(b'\n');
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }
        info!("sidecar input closed");
        Ok(())
    }
}
