//! Sandbox executor exposed as tools.

use super::host::parse_args;
use super::{ToolContext, ToolError, ToolHost, ToolSpec};
use crate::sandbox::{BashOptions, GrepQuery, SandboxExecutor};
use async_trait::async_trait;
use policy::Capability;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadArgs {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditArgs {
    path: String,
    old_text: String,
    new_text: String,
}

#[derive(Deserialize)]
struct LsArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct FindArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct BashArgs {
    command: String,
    /// Seconds.
    #[serde(default)]
    timeout: Option<u64>,
}

/// Exposes `read`, `write`, `edit`, `ls`, `find`, `grep` and `bash` over a
/// [`SandboxExecutor`]. The session comes from the call context.
#[derive(Debug, Clone)]
pub struct SandboxToolHost {
    executor: Arc<SandboxExecutor>,
}

impl SandboxToolHost {
    pub fn new(executor: SandboxExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::failed(format!("serialize result: {e}")))
}

#[async_trait]
impl ToolHost for SandboxToolHost {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(specs())
    }

    async fn call_tool(
        &self,
        name: &str,
        args: &str,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let session = ctx.session_id.as_str();
        debug!(tool = name, session_id = session, "calling sandbox tool");

        match name {
            "read" => {
                let a: ReadArgs = parse_args(args)?;
                to_value(
                    self.executor
                        .read_file(session, &a.path, a.offset, a.limit)
                        .await?,
                )
            }
            "write" => {
                let a: WriteArgs = parse_args(args)?;
                to_value(self.executor.write_file(session, &a.path, &a.content).await?)
            }
            "edit" => {
                let a: EditArgs = parse_args(args)?;
                to_value(
                    self.executor
                        .edit_file(session, &a.path, &a.old_text, &a.new_text)
                        .await?,
                )
            }
            "ls" => {
                let a: LsArgs = parse_args(args)?;
                to_value(self.executor.ls(session, a.path.as_deref(), a.limit).await?)
            }
            "find" => {
                let a: FindArgs = parse_args(args)?;
                to_value(
                    self.executor
                        .find(session, &a.pattern, a.path.as_deref(), a.limit)
                        .await?,
                )
            }
            "grep" => {
                let query: GrepQuery = parse_args(args)?;
                Ok(Value::String(self.executor.grep(session, &query).await?))
            }
            "bash" => {
                let a: BashArgs = parse_args(args)?;
                let options = BashOptions {
                    cancel: Some(ctx.cancel.clone()),
                    timeout: a.timeout.map(Duration::from_secs),
                    on_output: ctx.streams_updates().then(|| {
                        let ctx = ctx.clone();
                        Arc::new(move |chunk: &str| ctx.update(chunk, &Value::Null))
                            as crate::sandbox::OutputSink
                    }),
                };
                to_value(self.executor.run_bash(session, &a.command, options).await?)
            }
            other => Err(ToolError::unknown_tool(other)),
        }
    }
}

fn specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "read",
            "Read a text file from the workspace. Returns a window of lines.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to the workspace" },
                    "offset": { "type": "integer", "description": "1-indexed line to start at" },
                    "limit": { "type": "integer", "description": "Maximum lines to return" }
                },
                "required": ["path"]
            }),
        )
        .with_capabilities([Capability::fs_read()]),
        ToolSpec::new(
            "write",
            "Create or overwrite a file in the workspace.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        )
        .with_capabilities([Capability::fs_write()]),
        ToolSpec::new(
            "edit",
            "Replace exactly one occurrence of oldText with newText.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "oldText": { "type": "string" },
                    "newText": { "type": "string" }
                },
                "required": ["path", "oldText", "newText"]
            }),
        )
        .with_capabilities([Capability::fs_write()]),
        ToolSpec::new(
            "ls",
            "List a directory. Directories end with '/'.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "limit": { "type": "integer" }
                }
            }),
        )
        .with_capabilities([Capability::fs_read()]),
        ToolSpec::new(
            "find",
            "Find files by glob pattern, e.g. '*.rs' or 'src/**/*.rs'.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "path": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["pattern"]
            }),
        )
        .with_capabilities([Capability::fs_read()]),
        ToolSpec::new(
            "grep",
            "Search file contents. Returns 'path:line: text' lines.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regex, or literal text with literal=true" },
                    "path": { "type": "string" },
                    "glob": { "type": "string", "description": "Only search files matching this glob" },
                    "literal": { "type": "boolean" },
                    "ignoreCase": { "type": "boolean" },
                    "limit": { "type": "integer" }
                },
                "required": ["pattern"]
            }),
        )
        .with_capabilities([Capability::fs_read()]),
        ToolSpec::new(
            "bash",
            "Run a shell command in the workspace. stderr is merged into the output.",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "timeout": { "type": "integer", "description": "Timeout in seconds" }
                },
                "required": ["command"]
            }),
        )
        .with_capabilities([Capability::exec()]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxConfig;
    use std::sync::Mutex;

    fn host(root: &std::path::Path) -> SandboxToolHost {
        SandboxToolHost::new(SandboxExecutor::new(SandboxConfig::new(root)))
    }

    #[tokio::test]
    async fn advertises_tools_with_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let tools = host(dir.path()).list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["read", "write", "edit", "ls", "find", "grep", "bash"]);

        let bash = tools.iter().find(|t| t.name == "bash").unwrap();
        assert_eq!(bash.capability_tags().collect::<Vec<_>>(), ["exec"]);
    }

    #[tokio::test]
    async fn uses_context_session() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let ctx = ToolContext::new("abc");

        let out = host
            .call_tool("write", r#"{"path":"x.txt","content":"hey"}"#, &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({"path": "x.txt", "bytes": 3}));
        assert!(dir.path().join("abc/x.txt").is_file());

        let out = host
            .call_tool("read", r#"{"path":"x.txt"}"#, &ctx)
            .await
            .unwrap();
        assert_eq!(out["type"], "text");
        assert_eq!(out["content"], "hey");
        assert_eq!(out["totalLines"], 1);
    }

    #[tokio::test]
    async fn malformed_arguments_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let ctx = ToolContext::new("abc");

        for (tool, args) in [("read", "{}"), ("write", "not json"), ("edit", r#"{"path":1}"#)] {
            let err = host.call_tool(tool, args, &ctx).await.unwrap_err();
            assert_eq!(err.code(), "invalid_arguments", "{tool}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bash_streams_through_context() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        let ctx = ToolContext::new("abc")
            .with_on_update(move |delta, _| sink.lock().unwrap().push_str(delta));

        let out = host
            .call_tool("bash", r#"{"command":"echo hi"}"#, &ctx)
            .await
            .unwrap();
        assert_eq!(out["ok"], true);
        assert_eq!(out["exitCode"], 0);
        assert_eq!(*seen.lock().unwrap(), "hi\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bash_honours_context_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let ctx = ToolContext::new("abc");
        ctx.cancel.cancel();

        let out = host
            .call_tool("bash", r#"{"command":"sleep 30"}"#, &ctx)
            .await
            .unwrap();
        assert_eq!(out["cancelled"], true);
        assert_eq!(out["exitCode"], 137);
    }
}
