//! MCP error types.

use crate::protocol::JsonRpcError;
use thiserror::Error;

/// Errors surfaced by a [`Server`](crate::Server).
///
/// Lifecycle errors are broadcast to every pending request when the server
/// closes, so the type is `Clone` and carries rendered messages rather than
/// the underlying `io::Error`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("server is closed: {0}")]
    Closed(String),

    #[error("failed to spawn server: {0}")]
    Spawn(String),

    #[error("server exited: {0}")]
    Exited(String),

    #[error("failed to write to server: {0}")]
    Write(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    ToolFailed(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    ///
    /// JSON-RPC error responses report the remote's own numeric code.
    pub fn code(&self) -> String {
        match self {
            Error::Closed(_) => "mcp_closed".into(),
            Error::Spawn(_) => "mcp_spawn_error".into(),
            Error::Exited(_) => "mcp_exit".into(),
            Error::Write(_) => "mcp_write_error".into(),
            Error::InvalidArguments(_) => "invalid_arguments".into(),
            Error::ToolFailed(_) => "tool_error".into(),
            Error::JsonRpc(e) => e.code.to_string(),
            Error::InvalidResponse(_) => "invalid_response".into(),
        }
    }

    /// Whether this error means the server process is gone for good.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Error::Closed(_) | Error::Spawn(_) | Error::Exited(_) | Error::Write(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_codes() {
        assert_eq!(Error::Closed("x".into()).code(), "mcp_closed");
        assert_eq!(Error::Spawn("x".into()).code(), "mcp_spawn_error");
        assert_eq!(Error::Exited("x".into()).code(), "mcp_exit");
        assert_eq!(Error::Write("x".into()).code(), "mcp_write_error");
        assert!(Error::Exited("x".into()).is_lifecycle());
        assert!(!Error::ToolFailed("x".into()).is_lifecycle());
    }

    #[test]
    fn remote_code_is_passed_through() {
        let err = Error::from(JsonRpcError {
            code: -32602,
            message: "bad params".into(),
            data: None,
        });
        assert_eq!(err.code(), "-32602");
        assert!(err.to_string().contains("bad params"));
    }
}
