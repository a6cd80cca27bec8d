use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// A capability tag carried by a tool, e.g. `fs_read` or `mcp:github`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub const FS_READ: &'static str = "fs_read";
    pub const FS_WRITE: &'static str = "fs_write";
    pub const EXEC: &'static str = "exec";
    pub const NET_HTTP: &'static str = "net_http";
    pub const MCP: &'static str = "mcp";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn fs_read() -> Self {
        Self::new(Self::FS_READ)
    }

    pub fn fs_write() -> Self {
        Self::new(Self::FS_WRITE)
    }

    pub fn exec() -> Self {
        Self::new(Self::EXEC)
    }

    pub fn net_http() -> Self {
        Self::new(Self::NET_HTTP)
    }

    pub fn mcp() -> Self {
        Self::new(Self::MCP)
    }

    /// Tag scoping the tools of one MCP server, e.g. `mcp:filesystem`.
    pub fn mcp_server(name: &str) -> Self {
        Self(format!("{}:{name}", Self::MCP))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for Capability {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl Borrow<str> for Capability {
    fn borrow(&self) -> &str {
        &self.0
    }
}
