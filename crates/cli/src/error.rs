//! CLI error types.

use thiserror::Error;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// A tool call failed.
    #[error("{name} failed [{code}]: {source}", code = .source.code())]
    Tool {
        name: String,
        source: runtime::ToolError,
    },

    /// An error occurred in the runtime layer.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// Output could not be encoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
