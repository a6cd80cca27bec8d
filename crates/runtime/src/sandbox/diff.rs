//! Line-numbered diff rendering for edits.

use similar::{ChangeTag, DiffTag, TextDiff};

/// Unchanged lines shown around each change.
const CONTEXT_LINES: usize = 2;

/// Render `old -> new` as numbered lines and return the first changed line
/// (1-indexed, in the new text).
///
/// Removed lines are `-<old> text`, added lines `+<new> text` and context
/// lines ` <old> text`. Non-adjacent hunks are separated by `...`.
pub(super) fn render_diff(old: &str, new: &str) -> (String, usize) {
    let diff = TextDiff::from_lines(old, new);

    let first_changed_line = diff
        .ops()
        .iter()
        .find(|op| op.tag() != DiffTag::Equal)
        .map_or(1, |op| op.new_range().start + 1);

    let mut hunks = Vec::new();
    for group in diff.grouped_ops(CONTEXT_LINES) {
        let mut lines = Vec::new();
        for op in &group {
            for change in diff.iter_changes(op) {
                let text = change.value().trim_end_matches(['\n', '\r']);
                let line = match change.tag() {
                    ChangeTag::Delete => {
                        format!("-{} {text}", change.old_index().map_or(0, |i| i + 1))
                    }
                    ChangeTag::Insert => {
                        format!("+{} {text}", change.new_index().map_or(0, |i| i + 1))
                    }
                    ChangeTag::Equal => {
                        format!(" {} {text}", change.old_index().map_or(0, |i| i + 1))
                    }
                };
                lines.push(line);
            }
        }
        hunks.push(lines.join("\n"));
    }

    (hunks.join("\n...\n"), first_changed_line)
}
