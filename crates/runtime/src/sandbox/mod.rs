//! Sandboxed file and process execution inside session workspaces.
//!
//! Every operation resolves the session workspace first, then checks the
//! target path against it before any I/O. Paths in results are relative to
//! the workspace and use `/` separators.

mod bash;
mod diff;
mod fs;
mod search;

use crate::tools::ToolError;
use crate::workspace::{self, WorkspaceMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub use bash::{BashOptions, BashResult, OutputSink};
pub use fs::{EditResult, LsResult, ReadKind, ReadResult, WriteResult};
pub use search::{FindResult, GrepQuery};

/// Which grep implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrepBackend {
    /// `rg` when it is on `PATH`, the built-in searcher otherwise.
    #[default]
    Auto,
    Builtin,
    Ripgrep,
}

/// Executor settings. Deserializes from the `[sandbox]` config table; the
/// root and mode come from the top-level workspace settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    #[serde(skip)]
    pub root: PathBuf,
    #[serde(skip)]
    pub mode: WorkspaceMode,
    pub read_window_lines: usize,
    pub ls_limit: usize,
    pub find_limit: usize,
    pub grep_limit: usize,
    pub bash_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub grep_backend: GrepBackend,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspaces"),
            mode: WorkspaceMode::Isolated,
            read_window_lines: 2000,
            ls_limit: 500,
            find_limit: 1000,
            grep_limit: 100,
            bash_timeout_secs: 120,
            max_output_bytes: 30_000,
            grep_backend: GrepBackend::Auto,
        }
    }
}

impl SandboxConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: WorkspaceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_grep_backend(mut self, backend: GrepBackend) -> Self {
        self.grep_backend = backend;
        self
    }

    pub fn bash_timeout(&self) -> Duration {
        Duration::from_secs(self.bash_timeout_secs)
    }
}

/// Runs file and shell operations confined to session workspaces.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Workspace directory for `session_id`. Does not create it.
    pub fn workspace(&self, session_id: &str) -> Result<PathBuf, ToolError> {
        workspace::resolve(&self.config.root, session_id, self.config.mode)
    }

    /// Resolve `path` inside the session workspace, rejecting escapes.
    fn target(&self, session_id: &str, path: &str) -> Result<Target, ToolError> {
        let workspace = self.workspace(session_id)?;
        let path = workspace::contain(&workspace, path)?;
        workspace::check_symlinks(&workspace, &path)?;
        debug!(session_id, path = %path.display(), "resolved sandbox target");
        Ok(Target { workspace, path })
    }
}

/// A resolved, contained path plus the workspace it lives in.
#[derive(Debug, Clone)]
struct Target {
    workspace: PathBuf,
    path: PathBuf,
}

impl Target {
    fn is_root(&self) -> bool {
        self.path == self.workspace
    }

    fn display(&self) -> String {
        relative(&self.workspace, &self.path)
    }
}

/// `path` relative to `base` with `/` separators; `.` for `base` itself.
fn relative(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_uses_forward_slashes() {
        let base = Path::new("/ws");
        assert_eq!(relative(base, Path::new("/ws/a/b.txt")), "a/b.txt");
        assert_eq!(relative(base, base), ".");
    }

    #[test]
    fn config_table_uses_defaults_for_missing_keys() {
        let config: SandboxConfig = from_json(r#"{"grep_limit": 5, "grep_backend": "builtin"}"#);
        assert_eq!(config.grep_limit, 5);
        assert_eq!(config.grep_backend, GrepBackend::Builtin);
        assert_eq!(config.read_window_lines, 2000);
        assert_eq!(config.mode, WorkspaceMode::Isolated);
    }

    fn from_json(json: &str) -> SandboxConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn target_rejects_traversal() {
        let executor = SandboxExecutor::new(SandboxConfig::new("/srv/ws"));
        let err = executor.target("s1", "../s2/secret").unwrap_err();
        assert_eq!(err.code(), "path_outside_workspace");
    }
}
