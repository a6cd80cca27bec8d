//! Configuration loading from toolhost.toml.

use mcp::ServerConfig;
use policy::{Capability, Policy};
use runtime::{SandboxConfig, WorkspaceMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "toolhost.toml";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the session workspaces.
    pub workspace_root: PathBuf,

    /// Every session uses `workspace_root` directly.
    pub shared_workspace: bool,

    /// Executor limits.
    pub sandbox: SandboxConfig,

    /// Capability scope applied to the whole catalog.
    pub policy: Policy,

    /// MCP servers to spawn.
    pub servers: Vec<McpServerEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workspaces"),
            shared_workspace: false,
            sandbox: SandboxConfig::default(),
            policy: Policy::permissive(),
            servers: Vec::new(),
        }
    }
}

/// One `[[servers]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerEntry {
    #[serde(flatten)]
    pub server: ServerConfig,

    /// Replaces the default `mcp` / `mcp:<name>` tags.
    #[serde(default)]
    pub capabilities: Option<Vec<Capability>>,
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn mode(&self) -> WorkspaceMode {
        if self.shared_workspace {
            WorkspaceMode::Shared
        } else {
            WorkspaceMode::Isolated
        }
    }

    /// Executor settings with the root and mode filled in.
    pub fn sandbox_config(&self) -> SandboxConfig {
        let mut sandbox = self.sandbox.clone();
        sandbox.root = self.workspace_root.clone();
        sandbox.mode = self.mode();
        sandbox
    }
}
