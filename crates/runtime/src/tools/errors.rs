use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolError {
    #[error("path {path} is outside the workspace {root}")]
    PathOutsideWorkspace { path: String, root: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("expected exactly one match for the edit, found {count}")]
    AmbiguousOrMissingMatch { count: usize },

    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("tool not found: {name}")]
    UnknownTool { name: String },

    #[error("MCP server closed: {message}")]
    McpClosed { message: String },

    #[error("MCP server failed to spawn: {message}")]
    McpSpawnError { message: String },

    #[error("MCP server exited: {message}")]
    McpExit { message: String },

    #[error("MCP server write failed: {message}")]
    McpWriteError { message: String },

    #[error("{message}")]
    #[serde(rename = "tool_error")]
    Failed { message: String },

    #[error("remote error [{code}]: {message}")]
    Remote { code: i64, message: String },

    #[error("I/O error: {message}")]
    Io { message: String },
}

impl ToolError {
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool { name: name.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn not_found(path: impl AsRef<Path>) -> Self {
        Self::NotFound {
            path: path.as_ref().display().to_string(),
        }
    }

    pub fn outside_workspace(path: impl AsRef<Path>, root: impl AsRef<Path>) -> Self {
        Self::PathOutsideWorkspace {
            path: path.as_ref().display().to_string(),
            root: root.as_ref().display().to_string(),
        }
    }

    /// Map an I/O error on `path`, keeping not-found distinct.
    pub fn io(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::not_found(path)
        } else {
            Self::Io {
                message: format!("{}: {err}", path.as_ref().display()),
            }
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> String {
        match self {
            Self::PathOutsideWorkspace { .. } => "path_outside_workspace".into(),
            Self::NotFound { .. } => "not_found".into(),
            Self::AmbiguousOrMissingMatch { .. } => "ambiguous_or_missing_match".into(),
            Self::InvalidArguments { .. } => "invalid_arguments".into(),
            Self::UnknownTool { .. } => "unknown_tool".into(),
            Self::McpClosed { .. } => "mcp_closed".into(),
            Self::McpSpawnError { .. } => "mcp_spawn_error".into(),
            Self::McpExit { .. } => "mcp_exit".into(),
            Self::McpWriteError { .. } => "mcp_write_error".into(),
            Self::Failed { .. } => "tool_error".into(),
            Self::Remote { code, .. } => code.to_string(),
            Self::Io { .. } => "io_error".into(),
        }
    }
}

impl From<mcp::Error> for ToolError {
    fn from(err: mcp::Error) -> Self {
        match err {
            mcp::Error::Closed(message) => Self::McpClosed { message },
            mcp::Error::Spawn(message) => Self::McpSpawnError { message },
            mcp::Error::Exited(message) => Self::McpExit { message },
            mcp::Error::Write(message) => Self::McpWriteError { message },
            mcp::Error::InvalidArguments(message) => Self::InvalidArguments { message },
            mcp::Error::ToolFailed(message) => Self::Failed { message },
            mcp::Error::JsonRpc(e) => Self::Remote {
                code: e.code,
                message: e.message,
            },
            mcp::Error::InvalidResponse(message) => Self::Failed { message },
        }
    }
}
