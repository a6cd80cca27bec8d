//! File operations: write, read, ls, edit.

use super::diff::render_diff;
use super::{SandboxExecutor, Target};
use crate::tools::ToolError;
use serde::Serialize;
use tracing::debug;

/// Extensions treated as binary without looking at the content.
const BINARY_EXTENSIONS: &[&str] = &[
    "7z", "a", "avi", "bin", "bmp", "bz2", "class", "db", "dll", "dylib", "exe", "flac", "gif",
    "gz", "ico", "jar", "jpeg", "jpg", "mov", "mp3", "mp4", "o", "ogg", "otf", "pdf", "png", "so",
    "sqlite", "tar", "tgz", "ttf", "wasm", "wav", "webp", "woff", "woff2", "xz", "zip",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub path: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadKind {
    Text,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    #[serde(rename = "type")]
    pub kind: ReadKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub total_lines: usize,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LsResult {
    pub entries: Vec<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResult {
    pub path: String,
    pub diff: String,
    pub first_changed_line: usize,
}

impl SandboxExecutor {
    /// Create or overwrite a file, creating parent directories.
    pub async fn write_file(
        &self,
        session_id: &str,
        path: &str,
        content: &str,
    ) -> Result<WriteResult, ToolError> {
        let target = self.target(session_id, path)?;
        if target.is_root() {
            return Err(ToolError::invalid_arguments("cannot write to the workspace root"));
        }
        if let Some(parent) = target.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::io(parent, e))?;
        }
        tokio::fs::write(&target.path, content)
            .await
            .map_err(|e| ToolError::io(&target.path, e))?;

        debug!(session_id, path = %target.display(), bytes = content.len(), "wrote file");
        Ok(WriteResult {
            path: target.display(),
            bytes: content.len(),
        })
    }

    /// Read a window of lines. `offset` is 1-indexed.
    pub async fn read_file(
        &self,
        session_id: &str,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<ReadResult, ToolError> {
        let target = self.target(session_id, path)?;
        let metadata = tokio::fs::metadata(&target.path)
            .await
            .map_err(|e| ToolError::io(&target.path, e))?;
        if metadata.is_dir() {
            return Err(ToolError::invalid_arguments(format!(
                "{} is a directory",
                target.display()
            )));
        }

        let bytes = tokio::fs::read(&target.path)
            .await
            .map_err(|e| ToolError::io(&target.path, e))?;

        let text = match std::str::from_utf8(&bytes) {
            Ok(text) if !has_binary_extension(&target) && !bytes.contains(&0) => text,
            _ => {
                debug!(path = %target.display(), size = bytes.len(), "read binary file");
                return Ok(ReadResult {
                    kind: ReadKind::Binary,
                    content: None,
                    total_lines: 0,
                    has_more: false,
                    size: Some(metadata.len()),
                });
            }
        };

        // Lines keep their terminators so a window reproduces the file bytes.
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let total_lines = lines.len();
        let window = self.config.read_window_lines;
        let limit = limit.unwrap_or(window).clamp(1, window.max(1));
        let offset = offset.unwrap_or(1).max(1);

        if offset > total_lines.max(1) {
            return Err(ToolError::invalid_arguments(format!(
                "offset {offset} is past the end of {} ({total_lines} lines)",
                target.display()
            )));
        }

        let start = offset - 1;
        let end = (start + limit).min(total_lines);
        Ok(ReadResult {
            kind: ReadKind::Text,
            content: Some(lines[start..end].concat()),
            total_lines,
            has_more: end < total_lines,
            size: None,
        })
    }

    /// List immediate children of a directory.
    pub async fn ls(
        &self,
        session_id: &str,
        path: Option<&str>,
        limit: Option<usize>,
    ) -> Result<LsResult, ToolError> {
        let target = self.target(session_id, path.unwrap_or("."))?;
        let limit = limit.unwrap_or(self.config.ls_limit);

        let mut dir = match tokio::fs::read_dir(&target.path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && target.is_root() => {
                return Ok(LsResult {
                    entries: Vec::new(),
                    truncated: false,
                });
            }
            Err(e) if target.path.is_file() => {
                debug!(error = %e, "ls on a file");
                return Err(ToolError::invalid_arguments(format!(
                    "{} is not a directory",
                    target.display()
                )));
            }
            Err(e) => return Err(ToolError::io(&target.path, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::io(&target.path, e))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        let truncated = entries.len() > limit;
        entries.truncate(limit);
        Ok(LsResult { entries, truncated })
    }

    /// Replace the single occurrence of `old_text` with `new_text`.
    pub async fn edit_file(
        &self,
        session_id: &str,
        path: &str,
        old_text: &str,
        new_text: &str,
    ) -> Result<EditResult, ToolError> {
        let target = self.target(session_id, path)?;
        let content = tokio::fs::read_to_string(&target.path)
            .await
            .map_err(|e| ToolError::io(&target.path, e))?;

        let count = count_occurrences(&content, old_text);
        if count != 1 {
            debug!(path = %target.display(), count, "edit rejected");
            return Err(ToolError::AmbiguousOrMissingMatch { count });
        }

        let updated = content.replacen(old_text, new_text, 1);
        tokio::fs::write(&target.path, &updated)
            .await
            .map_err(|e| ToolError::io(&target.path, e))?;

        let (diff, first_changed_line) = render_diff(&content, &updated);
        Ok(EditResult {
            path: target.display(),
            diff,
            first_changed_line,
        })
    }
}

fn has_binary_extension(target: &Target) -> bool {
    target
        .path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            BINARY_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Count occurrences of `needle`, including overlapping ones.
///
/// An empty needle matches at every char boundary.
fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return haystack.chars().count() + 1;
    }
    let mut count = 0;
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        count += 1;
        let at = start + pos;
        start = at + haystack[at..].chars().next().map_or(1, char::len_utf8);
    }
    count
}
