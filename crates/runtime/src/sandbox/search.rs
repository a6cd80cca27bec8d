//! `find` and `grep` over a session workspace.

use super::{GrepBackend, SandboxExecutor, Target, relative};
use crate::tools::ToolError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use glob::{MatchOptions, Pattern};
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use grep_searcher::sinks::Lossy;
use grep_searcher::{BinaryDetection, SearcherBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

pub const NO_MATCHES: &str = "No matches found";

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindResult {
    pub files: Vec<String>,
    pub truncated: bool,
    pub limit: usize,
}

/// Parameters for a content search.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepQuery {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub glob: Option<String>,
    #[serde(default)]
    pub literal: bool,
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl GrepQuery {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }
}

/// One matching line, before post-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GrepMatch {
    path: PathBuf,
    line: u64,
    text: String,
}

/// A compiled glob that matches the relative path when it contains `/`,
/// otherwise the file name at any depth.
#[derive(Debug, Clone)]
struct FileFilter {
    pattern: Pattern,
    by_path: bool,
}

impl FileFilter {
    fn new(raw: &str) -> Result<Self, ToolError> {
        let pattern = Pattern::new(raw)
            .map_err(|e| ToolError::invalid_arguments(format!("invalid glob {raw:?}: {e}")))?;
        Ok(Self {
            pattern,
            by_path: raw.contains('/'),
        })
    }

    fn matches(&self, base: &Path, path: &Path) -> bool {
        if self.by_path {
            self.pattern.matches_with(&relative(base, path), GLOB_OPTIONS)
        } else {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| self.pattern.matches_with(name, GLOB_OPTIONS))
        }
    }
}

fn is_git_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name() == ".git"
}

/// Every file under `root`, hidden ones included, `.git` skipped.
fn walk_files(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_git_dir(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path)
}

impl SandboxExecutor {
    /// Find files matching a glob under `path` (default: workspace root).
    /// Returned paths are relative to the search root.
    pub async fn find(
        &self,
        session_id: &str,
        pattern: &str,
        path: Option<&str>,
        limit: Option<usize>,
    ) -> Result<FindResult, ToolError> {
        let target = self.target(session_id, path.unwrap_or("."))?;
        let filter = FileFilter::new(pattern)?;
        let limit = limit.unwrap_or(self.config.find_limit);

        if !self.search_root_exists(&target).await? {
            return Ok(FindResult {
                files: Vec::new(),
                truncated: false,
                limit,
            });
        }

        let files = tokio::task::spawn_blocking(move || {
            let base = filter_base(&target.path);
            let mut files: Vec<String> = walk_files(&target.path)
                .filter(|file| filter.matches(&base, file))
                .map(|file| relative(&base, &file))
                .collect();
            files.sort();
            files
        })
        .await
        .map_err(|e| ToolError::failed(format!("find task failed: {e}")))?;

        let truncated = files.len() > limit;
        let mut files = files;
        files.truncate(limit);
        debug!(session_id, pattern, count = files.len(), truncated, "find finished");
        Ok(FindResult {
            files,
            truncated,
            limit,
        })
    }

    /// Search file contents. Returns formatted `path:line: text` lines or
    /// `No matches found`.
    pub async fn grep(&self, session_id: &str, query: &GrepQuery) -> Result<String, ToolError> {
        let target = self.target(session_id, query.path.as_deref().unwrap_or("."))?;
        let filter = query.glob.as_deref().map(FileFilter::new).transpose()?;
        let matcher = build_matcher(query)?;
        let limit = query.limit.unwrap_or(self.config.grep_limit);

        if !self.search_root_exists(&target).await? {
            return Ok(NO_MATCHES.to_string());
        }

        let matches = match self.config.grep_backend {
            GrepBackend::Builtin => search_builtin(target.clone(), matcher).await?,
            GrepBackend::Ripgrep => match which::which("rg") {
                Ok(rg) => search_ripgrep(&rg, &target, query).await?,
                Err(e) => return Err(ToolError::failed(format!("rg not found: {e}"))),
            },
            GrepBackend::Auto => match which::which("rg") {
                Ok(rg) => search_ripgrep(&rg, &target, query).await?,
                Err(_) => search_builtin(target.clone(), matcher).await?,
            },
        };

        debug!(session_id, pattern = %query.pattern, raw = matches.len(), "grep finished");
        tokio::task::spawn_blocking(move || format_matches(&target, filter.as_ref(), matches, limit))
            .await
            .map_err(|e| ToolError::failed(format!("grep task failed: {e}")))
    }

    /// A missing workspace root counts as empty; any other missing path is
    /// an error.
    async fn search_root_exists(&self, target: &Target) -> Result<bool, ToolError> {
        match tokio::fs::metadata(&target.path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && target.is_root() => Ok(false),
            Err(e) => Err(ToolError::io(&target.path, e)),
        }
    }
}

/// Globs apply relative to the searched directory, or to a searched file's
/// parent.
fn filter_base(search_root: &Path) -> PathBuf {
    if search_root.is_file() {
        search_root
            .parent()
            .map_or_else(|| search_root.to_path_buf(), Path::to_path_buf)
    } else {
        search_root.to_path_buf()
    }
}

fn build_matcher(query: &GrepQuery) -> Result<RegexMatcher, ToolError> {
    RegexMatcherBuilder::new()
        .case_insensitive(query.ignore_case)
        .fixed_strings(query.literal)
        .build(&query.pattern)
        .map_err(|e| ToolError::invalid_arguments(format!("invalid pattern: {e}")))
}

/// Shared post-processing for both backends: filter, sort, cap, format.
fn format_matches(
    target: &Target,
    filter: Option<&FileFilter>,
    mut matches: Vec<GrepMatch>,
    limit: usize,
) -> String {
    if let Some(filter) = filter {
        let base = filter_base(&target.path);
        matches.retain(|m| filter.matches(&base, &m.path));
    }

    let mut binary: HashMap<PathBuf, bool> = HashMap::new();
    matches.retain(|m| {
        !*binary
            .entry(m.path.clone())
            .or_insert_with(|| looks_binary(&m.path))
    });

    if matches.is_empty() {
        return NO_MATCHES.to_string();
    }

    matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
    matches.dedup();

    let truncated = matches.len() > limit;
    let mut lines: Vec<String> = matches
        .iter()
        .take(limit)
        .map(|m| format!("{}:{}: {}", relative(&target.workspace, &m.path), m.line, m.text))
        .collect();
    if truncated {
        lines.push(format!("[{limit} matches limit reached]"));
    }
    lines.join("\n")
}

/// A NUL byte in the first block marks a file as binary.
fn looks_binary(path: &Path) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut head = [0u8; 8192];
    match file.read(&mut head) {
        Ok(n) => head[..n].contains(&0),
        Err(_) => false,
    }
}

async fn search_builtin(target: Target, matcher: RegexMatcher) -> Result<Vec<GrepMatch>, ToolError> {
    tokio::task::spawn_blocking(move || {
        let mut searcher = SearcherBuilder::new()
            .binary_detection(BinaryDetection::quit(b'\x00'))
            .line_number(true)
            .build();

        let mut matches = Vec::new();
        for file in walk_files(&target.path) {
            let result = searcher.search_path(
                &matcher,
                &file,
                Lossy(|line, text| {
                    matches.push(GrepMatch {
                        path: file.clone(),
                        line,
                        text: text.trim_end_matches(['\n', '\r']).to_string(),
                    });
                    Ok(true)
                }),
            );
            if let Err(e) = result {
                debug!(path = %file.display(), error = %e, "skipping file");
            }
        }
        matches
    })
    .await
    .map_err(|e| ToolError::failed(format!("grep task failed: {e}")))
}

async fn search_ripgrep(
    rg: &Path,
    target: &Target,
    query: &GrepQuery,
) -> Result<Vec<GrepMatch>, ToolError> {
    let mut command = tokio::process::Command::new(rg);
    command.args(["--json", "--hidden", "--no-ignore", "--glob", "!.git"]);
    if query.ignore_case {
        command.arg("--ignore-case");
    }
    if query.literal {
        command.arg("--fixed-strings");
    }
    command
        .arg("--regexp")
        .arg(&query.pattern)
        .arg("--")
        .arg(&target.path)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    let output = command
        .output()
        .await
        .map_err(|e| ToolError::failed(format!("failed to run rg: {e}")))?;

    // 0 = matches, 1 = none, anything else is an error.
    match output.status.code() {
        Some(0) | Some(1) => {}
        _ => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, %stderr, "rg failed");
            return Err(ToolError::failed(format!("rg failed: {}", stderr.trim())));
        }
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().filter_map(parse_rg_line).collect())
}

/// Parse one `rg --json` event, keeping only `match` events.
fn parse_rg_line(line: &str) -> Option<GrepMatch> {
    let event: Value = serde_json::from_str(line).ok()?;
    if event.get("type")?.as_str()? != "match" {
        return None;
    }
    let data = event.get("data")?;
    let path = path_from_bytes(rg_data(data.get("path")?)?);
    let text = rg_data(data.get("lines")?)?;
    let line = data.get("line_number")?.as_u64()?;
    Some(GrepMatch {
        path,
        line,
        text: String::from_utf8_lossy(&text)
            .trim_end_matches(['\n', '\r'])
            .to_string(),
    })
}

/// `rg --json` sends UTF-8 data as `{"text": ..}` and anything else as
/// `{"bytes": <base64>}`.
fn rg_data(value: &Value) -> Option<Vec<u8>> {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        return Some(text.as_bytes().to_vec());
    }
    let encoded = value.get("bytes")?.as_str()?;
    match BASE64_STANDARD.decode(encoded) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!(error = %e, "dropping rg event with bad base64");
            None
        }
    }
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxConfig;
    use serde_json::json;

    fn setup(backend: GrepBackend) -> (tempfile::TempDir, SandboxExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let exec =
            SandboxExecutor::new(SandboxConfig::new(dir.path()).with_grep_backend(backend));
        let ws = dir.path().join("s1");
        std::fs::create_dir_all(ws.join("src/nested")).unwrap();
        std::fs::create_dir_all(ws.join(".git")).unwrap();
        std::fs::write(ws.join("src/main.rs"), "fn main() {\n    println!(\"hello\");\n}\n").unwrap();
        std::fs::write(ws.join("src/nested/lib.rs"), "// hello there\npub fn lib() {}\n").unwrap();
        std::fs::write(ws.join("README.md"), "Hello docs\n").unwrap();
        std::fs::write(ws.join(".env"), "SECRET=hello\n").unwrap();
        std::fs::write(ws.join(".git/config"), "hello git\n").unwrap();
        std::fs::write(ws.join("blob.bin"), b"hello\0world").unwrap();
        (dir, exec)
    }

    #[tokio::test]
    async fn find_matches_basename_at_any_depth() {
        let (_dir, exec) = setup(GrepBackend::Builtin);
        let found = exec.find("s1", "*.rs", None, None).await.unwrap();
        assert_eq!(found.files, vec!["src/main.rs", "src/nested/lib.rs"]);
        assert!(!found.truncated);
        assert_eq!(found.limit, 1000);
    }

    #[tokio::test]
    async fn find_with_slash_matches_relative_path() {
        let (_dir, exec) = setup(GrepBackend::Builtin);
        let found = exec.find("s1", "src/*.rs", None, None).await.unwrap();
        assert_eq!(found.files, vec!["src/main.rs"]);

        let found = exec.find("s1", "nested/*.rs", Some("src"), None).await.unwrap();
        assert_eq!(found.files, vec!["nested/lib.rs"]);
    }

    #[tokio::test]
    async fn find_paths_are_relative_to_search_root() {
        let (_dir, exec) = setup(GrepBackend::Builtin);
        let found = exec.find("s1", "*.rs", Some("src"), None).await.unwrap();
        assert_eq!(found.files, vec!["main.rs", "nested/lib.rs"]);

        let found = exec.find("s1", "*.rs", Some("src/nested"), None).await.unwrap();
        assert_eq!(found.files, vec!["lib.rs"]);
    }

    #[tokio::test]
    async fn find_includes_hidden_and_skips_git() {
        let (_dir, exec) = setup(GrepBackend::Builtin);
        let found = exec.find("s1", "*", None, None).await.unwrap();
        assert!(found.files.contains(&".env".to_string()));
        assert!(found.files.iter().all(|f| !f.starts_with(".git/")));
    }

    #[tokio::test]
    async fn find_empty_and_truncated() {
        let (_dir, exec) = setup(GrepBackend::Builtin);
        let found = exec.find("s1", "*.py", None, None).await.unwrap();
        assert!(found.files.is_empty());

        let found = exec.find("s1", "*", None, Some(2)).await.unwrap();
        assert_eq!(found.files.len(), 2);
        assert!(found.truncated);

        let found = exec.find("brand-new", "*", None, None).await.unwrap();
        assert!(found.files.is_empty());
    }

    #[tokio::test]
    async fn builtin_grep_formats_sorted_matches() {
        let (_dir, exec) = setup(GrepBackend::Builtin);
        let out = exec.grep("s1", &GrepQuery::new("hello")).await.unwrap();
        assert_eq!(
            out,
            ".env:1: SECRET=hello\nsrc/main.rs:2:     println!(\"hello\");\nsrc/nested/lib.rs:1: // hello there"
        );
    }

    #[tokio::test]
    async fn builtin_grep_options() {
        let (_dir, exec) = setup(GrepBackend::Builtin);

        let mut query = GrepQuery::new("hello");
        query.ignore_case = true;
        query.glob = Some("*.md".into());
        let out = exec.grep("s1", &query).await.unwrap();
        assert_eq!(out, "README.md:1: Hello docs");

        let mut query = GrepQuery::new("println!(");
        query.literal = true;
        let out = exec.grep("s1", &query).await.unwrap();
        assert!(out.starts_with("src/main.rs:2:"));

        let mut query = GrepQuery::new("hello");
        query.limit = Some(1);
        let out = exec.grep("s1", &query).await.unwrap();
        assert_eq!(out, ".env:1: SECRET=hello\n[1 matches limit reached]");
    }

    #[tokio::test]
    async fn grep_no_matches_and_bad_pattern() {
        for backend in [GrepBackend::Builtin, GrepBackend::Auto] {
            let (_dir, exec) = setup(backend);
            let out = exec.grep("s1", &GrepQuery::new("zzz_absent")).await.unwrap();
            assert_eq!(out, NO_MATCHES);

            let err = exec.grep("s1", &GrepQuery::new("(unclosed")).await.unwrap_err();
            assert_eq!(err.code(), "invalid_arguments");
        }
    }

    #[tokio::test]
    async fn backends_agree_when_rg_is_available() {
        if which::which("rg").is_err() {
            return;
        }
        let (_dir, builtin) = setup(GrepBackend::Builtin);
        let ripgrep = SandboxExecutor::new(
            SandboxConfig::new(builtin.config().root.clone()).with_grep_backend(GrepBackend::Ripgrep),
        );
        let query = GrepQuery::new("hello");
        assert_eq!(
            builtin.grep("s1", &query).await.unwrap(),
            ripgrep.grep("s1", &query).await.unwrap()
        );
    }

    fn rg_match(path: &Path, line: u64, text: &[u8]) -> String {
        let lines = match std::str::from_utf8(text) {
            Ok(text) => json!({ "text": text }),
            Err(_) => json!({ "bytes": BASE64_STANDARD.encode(text) }),
        };
        json!({
            "type": "match",
            "data": {
                "path": { "text": path.to_str().unwrap() },
                "lines": lines,
                "line_number": line,
                "absolute_offset": 0,
                "submatches": []
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn recorded_rg_output_formats_like_builtin() {
        let (_dir, exec) = setup(GrepBackend::Builtin);
        let target = exec.target("s1", ".").unwrap();
        let ws = target.path.clone();
        std::fs::write(ws.join("latin.txt"), b"hello caf\xe9\n").unwrap();

        // Event stream as `rg --json hello` emits it, in traversal order.
        let recorded = [
            json!({"type": "begin", "data": {"path": {"text": ws.join("src/nested/lib.rs").to_str().unwrap()}}}).to_string(),
            rg_match(&ws.join("src/nested/lib.rs"), 1, b"// hello there\n"),
            rg_match(&ws.join("latin.txt"), 1, b"hello caf\xe9\n"),
            rg_match(&ws.join(".env"), 1, b"SECRET=hello\n"),
            rg_match(&ws.join("blob.bin"), 1, b"hello\n"),
            rg_match(&ws.join("src/main.rs"), 2, b"    println!(\"hello\");\n"),
            json!({"type": "summary", "data": {"elapsed_total": {"secs": 0, "nanos": 1}}}).to_string(),
        ];
        let parsed = || -> Vec<GrepMatch> {
            recorded.iter().filter_map(|line| parse_rg_line(line)).collect()
        };
        assert_eq!(parsed().len(), 5);

        let limit = exec.config().grep_limit;
        let builtin = exec.grep("s1", &GrepQuery::new("hello")).await.unwrap();
        assert_eq!(format_matches(&target, None, parsed(), limit), builtin);
        assert!(builtin.contains("latin.txt:1: hello caf\u{FFFD}"), "{builtin}");
        assert!(!builtin.contains("blob.bin"));

        let mut query = GrepQuery::new("hello");
        query.glob = Some("*.rs".into());
        let filter = FileFilter::new("*.rs").unwrap();
        assert_eq!(
            format_matches(&target, Some(&filter), parsed(), limit),
            exec.grep("s1", &query).await.unwrap()
        );

        query.glob = None;
        query.limit = Some(2);
        assert_eq!(
            format_matches(&target, None, parsed(), 2),
            exec.grep("s1", &query).await.unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn parses_rg_bytes_fields() {
        use std::os::unix::ffi::OsStrExt;

        let line = r#"{"type":"match","data":{"path":{"bytes":"L3dzL2NhZukudHh0"},"lines":{"bytes":"aGl0IP8K"},"line_number":7,"absolute_offset":0,"submatches":[]}}"#;
        let m = parse_rg_line(line).unwrap();
        assert_eq!(m.path.as_os_str().as_bytes(), b"/ws/caf\xe9.txt");
        assert_eq!(m.line, 7);
        assert_eq!(m.text, "hit \u{FFFD}");

        let bad = r#"{"type":"match","data":{"path":{"text":"/ws/a"},"lines":{"bytes":"!!"},"line_number":1}}"#;
        assert!(parse_rg_line(bad).is_none());
    }

    #[test]
    fn parses_rg_match_events() {
        let line = r#"{"type":"match","data":{"path":{"text":"/ws/a.txt"},"lines":{"text":"hit\n"},"line_number":4,"absolute_offset":0,"submatches":[]}}"#;
        let m = parse_rg_line(line).unwrap();
        assert_eq!(m.path, PathBuf::from("/ws/a.txt"));
        assert_eq!(m.line, 4);
        assert_eq!(m.text, "hit");

        assert!(parse_rg_line(r#"{"type":"begin","data":{}}"#).is_none());
        assert!(parse_rg_line("not json").is_none());
    }
}
