//! Session workspace resolution and path containment.

use crate::tools::ToolError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// How sessions map onto the workspace root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceMode {
    /// Each session gets `<root>/<session_id>`.
    #[default]
    Isolated,
    /// Every session uses `<root>` directly.
    Shared,
}

/// Compute the workspace directory for a session. Pure, no I/O.
pub fn resolve(root: &Path, session_id: &str, mode: WorkspaceMode) -> Result<PathBuf, ToolError> {
    validate_session_id(session_id)?;
    Ok(match mode {
        WorkspaceMode::Isolated => root.join(session_id),
        WorkspaceMode::Shared => root.to_path_buf(),
    })
}

/// A session id must be exactly one normal path component.
fn validate_session_id(session_id: &str) -> Result<(), ToolError> {
    let mut components = Path::new(session_id).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    let has_separator = session_id.contains(['/', '\\', '\0']);

    if session_id.is_empty() || !single_normal || has_separator {
        return Err(ToolError::invalid_arguments(format!(
            "invalid session id {session_id:?}"
        )));
    }
    Ok(())
}

/// Join `path` onto `workspace` and reject anything that lands outside it.
///
/// Absolute paths are accepted only when they already name the workspace or
/// a descendant. Normalization is lexical; see [`check_symlinks`] for the
/// filesystem half.
pub fn contain(workspace: &Path, path: &str) -> Result<PathBuf, ToolError> {
    let base = normalize_lexical(workspace);
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        normalize_lexical(candidate)
    } else {
        normalize_lexical(&base.join(candidate))
    };

    if escapes(&base, &joined, candidate) {
        return Err(ToolError::outside_workspace(path, workspace));
    }
    Ok(joined)
}

/// `..` that would climb above the filesystem root is dropped by
/// normalization, so also reject any relative input that climbs above the
/// workspace at any point.
fn escapes(base: &Path, joined: &Path, candidate: &Path) -> bool {
    if !joined.starts_with(base) {
        return true;
    }
    if candidate.is_absolute() {
        return false;
    }
    let mut depth: usize = 0;
    for component in candidate.components() {
        match component {
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return true,
            },
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    false
}

/// Reject paths whose nearest existing ancestor resolves outside the
/// workspace through a symlink.
///
/// The workspace itself may not exist yet; then nothing below it can be a
/// symlink and the check passes.
pub fn check_symlinks(workspace: &Path, path: &Path) -> Result<(), ToolError> {
    let Ok(base) = workspace.canonicalize() else {
        return Ok(());
    };

    let mut ancestor = path;
    loop {
        if let Ok(resolved) = ancestor.canonicalize() {
            if resolved.starts_with(&base) {
                return Ok(());
            }
            return Err(ToolError::outside_workspace(path, workspace));
        }
        match ancestor.parent() {
            Some(parent) if parent != ancestor => ancestor = parent,
            _ => return Ok(()),
        }
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                // Only pop a normal component; never climb past root or prefix.
                if components
                    .last()
                    .is_some_and(|c| matches!(c, Component::Normal(_)))
                {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_sessions_are_distinct() {
        let root = Path::new("/srv/ws");
        let a = resolve(root, "alpha", WorkspaceMode::Isolated).unwrap();
        let b = resolve(root, "beta", WorkspaceMode::Isolated).unwrap();
        assert_eq!(a, root.join("alpha"));
        assert_ne!(a, b);
        assert!(!a.starts_with(&b) && !b.starts_with(&a));
    }

    #[test]
    fn shared_sessions_use_root() {
        let root = Path::new("/srv/ws");
        let a = resolve(root, "alpha", WorkspaceMode::Shared).unwrap();
        let b = resolve(root, "beta", WorkspaceMode::Shared).unwrap();
        assert_eq!(a, root);
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_session_ids_that_are_not_one_component() {
        let root = Path::new("/srv/ws");
        for id in ["", ".", "..", "a/b", "../x", "/abs", "a\\b", "nul\0"] {
            let err = resolve(root, id, WorkspaceMode::Isolated).unwrap_err();
            assert_eq!(err.code(), "invalid_arguments", "id {id:?}");
        }
    }

    #[test]
    fn contain_accepts_descendants() {
        let ws = Path::new("/srv/ws/s1");
        assert_eq!(contain(ws, "a/b.txt").unwrap(), ws.join("a/b.txt"));
        assert_eq!(contain(ws, "./a/../b.txt").unwrap(), ws.join("b.txt"));
        assert_eq!(contain(ws, ".").unwrap(), ws);
        assert_eq!(contain(ws, "/srv/ws/s1/x").unwrap(), ws.join("x"));
    }

    #[test]
    fn contain_rejects_escapes() {
        let ws = Path::new("/srv/ws/s1");
        for path in ["../etc/passwd", "a/../../s2/x", "/etc/passwd", "/srv/ws/s10"] {
            let err = contain(ws, path).unwrap_err();
            assert_eq!(err.code(), "path_outside_workspace", "path {path:?}");
        }
    }

    #[test]
    fn contain_rejects_climbing_out_and_back() {
        let ws = Path::new("/srv/ws/s1");
        assert!(contain(ws, "../s1/file").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), ws.path().join("link")).unwrap();

        let target = contain(ws.path(), "link/secret.txt").unwrap();
        let err = check_symlinks(ws.path(), &target).unwrap_err();
        assert_eq!(err.code(), "path_outside_workspace");

        let inside = contain(ws.path(), "plain/new.txt").unwrap();
        assert!(check_symlinks(ws.path(), &inside).is_ok());
    }

    #[test]
    fn missing_workspace_passes_symlink_check() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("not-yet");
        let target = contain(&ws, "a.txt").unwrap();
        assert!(check_symlinks(&ws, &target).is_ok());
    }
}
