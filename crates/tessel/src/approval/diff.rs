//! Unified diff previews for file-mutating tool calls.
//!
//! The preview is computed against what is on disk right now, so the user
//! sees exactly what the call would change.

use std::path::Path;

use serde_json::Value;

use crate::tools::names;

const CONTEXT_LINES: usize = 3;

/// Longest preview shown to the user, in lines.
pub const MAX_DIFF_LINES: usize = 200;

/// Above this many cells the LCS table is skipped and the changed region
/// is shown as a straight replacement.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op<'a> {
    Equal(&'a str),
    Delete(&'a str),
    Insert(&'a str),
}

fn diff_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Op<'a>> {
    let prefix = old
        .iter()
        .zip(new)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut ops: Vec<Op<'a>> = old[..prefix].iter().map(|l| Op::Equal(l)).collect();

    if old_mid.len().saturating_mul(new_mid.len()) > MAX_LCS_CELLS {
        ops.extend(old_mid.iter().map(|l| Op::Delete(l)));
        ops.extend(new_mid.iter().map(|l| Op::Insert(l)));
    } else {
        ops.extend(lcs_ops(old_mid, new_mid));
    }

    ops.extend(old[old.len() - suffix..].iter().map(|l| Op::Equal(l)));
    ops
}

fn lcs_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Op<'a>> {
    let (n, m) = (old.len(), new.len());
    // table[i][j] = LCS length of old[i..] and new[j..]
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op::Equal(old[i]));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push(Op::Delete(old[i]));
            i += 1;
        } else {
            ops.push(Op::Insert(new[j]));
            j += 1;
        }
    }
    ops.extend(old[i..].iter().map(|l| Op::Delete(l)));
    ops.extend(new[j..].iter().map(|l| Op::Insert(l)));
    ops
}

/// Unified diff of `old` against `new` with three lines of context,
/// capped at [`MAX_DIFF_LINES`]. Empty when the texts are equal.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let ops = diff_ops(&old_lines, &new_lines);

    // Line numbers (0-based) before each op.
    let mut positions = Vec::with_capacity(ops.len());
    let (mut o, mut n) = (0usize, 0usize);
    for op in &ops {
        positions.push((o, n));
        match op {
            Op::Equal(_) => {
                o += 1;
                n += 1;
            }
            Op::Delete(_) => o += 1,
            Op::Insert(_) => n += 1,
        }
    }

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, Op::Equal(_)))
        .map(|(i, _)| i)
        .collect();
    if changes.is_empty() {
        return String::new();
    }

    // Merge change indices into hunk ranges [start, end).
    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for &idx in &changes {
        let start = idx.saturating_sub(CONTEXT_LINES);
        let end = (idx + 1 + CONTEXT_LINES).min(ops.len());
        match hunks.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => hunks.push((start, end)),
        }
    }

    let mut lines = vec![format!("--- a/{path}"), format!("+++ b/{path}")];
    for (start, end) in hunks {
        let slice = &ops[start..end];
        let old_count = slice.iter().filter(|op| !matches!(op, Op::Insert(_))).count();
        let new_count = slice.iter().filter(|op| !matches!(op, Op::Delete(_))).count();
        let (old_start, new_start) = positions[start];
        lines.push(format!(
            "@@ -{},{} +{},{} @@",
            hunk_start(old_start, old_count),
            old_count,
            hunk_start(new_start, new_count),
            new_count
        ));
        for op in slice {
            lines.push(match op {
                Op::Equal(l) => format!(" {l}"),
                Op::Delete(l) => format!("-{l}"),
                Op::Insert(l) => format!("+{l}"),
            });
        }
    }

    if lines.len() > MAX_DIFF_LINES {
        let hidden = lines.len() - MAX_DIFF_LINES;
        lines.truncate(MAX_DIFF_LINES);
        lines.push(format!("... ({hidden} more lines)"));
    }
    lines.join("\n")
}

fn hunk_start(zero_based: usize, count: usize) -> usize {
    if count == 0 { zero_based } else { zero_based + 1 }
}

// ── Previews ──────────────────────────────────────────────────────

/// Diff preview for a write, edit or insert call, or `None` for other tools
/// and inputs that cannot be applied (e.g. an edit whose target text is
/// missing).
pub fn preview(tool_name: &str, input: &Value, workdir: &Path) -> Option<String> {
    let rel = names::input_path(input)?;
    let path = workdir.join(rel);
    let current = std::fs::read_to_string(&path).unwrap_or_default();
    let str_field = |key: &str| input.get(key).and_then(Value::as_str);

    let proposed = match tool_name {
        names::WRITE_FILE => str_field("content")?.to_string(),
        names::EDIT_FILE => {
            let old = str_field("old_string")?;
            let new = str_field("new_string").unwrap_or_default();
            if old.is_empty() || !current.contains(old) {
                return None;
            }
            if input.get("replace_all").and_then(Value::as_bool) == Some(true) {
                current.replace(old, new)
            } else {
                current.replacen(old, new, 1)
            }
        }
        names::INSERT_LINE => {
            let line = input.get("line").and_then(Value::as_u64)? as usize;
            let content = str_field("content")?;
            insert_at_line(&current, line, content)
        }
        _ => return None,
    };

    let diff = unified_diff(rel, &current, &proposed);
    (!diff.is_empty()).then_some(diff)
}

/// Insert `content` before 1-based `line`. Lines past the end append.
pub(crate) fn insert_at_line(current: &str, line: usize, content: &str) -> String {
    let mut lines: Vec<&str> = current.lines().collect();
    let index = line.saturating_sub(1).min(lines.len());
    lines.insert(index, content.trim_end_matches('\n'));
    let mut out = lines.join("\n");
    if current.ends_with('\n') || current.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_line_change_has_context() {
        let old = "a\nb\nc\nd\ne\nf\ng\nh\n";
        let new = "a\nb\nc\nd\nE\nf\ng\nh\n";
        let diff = unified_diff("x.txt", old, new);
        assert_eq!(
            diff,
            "--- a/x.txt\n+++ b/x.txt\n@@ -2,7 +2,7 @@\n b\n c\n d\n-e\n+E\n f\n g\n h"
        );
    }

    #[test]
    fn distant_changes_form_separate_hunks() {
        let old: String = (1..=20).map(|i| format!("line{i}\n")).collect();
        let new = old.replace("line2\n", "two\n").replace("line18\n", "eighteen\n");
        let diff = unified_diff("f", &old, &new);
        assert_eq!(diff.matches("@@ -").count(), 2);
        assert!(diff.contains("-line2\n+two"));
        assert!(diff.contains("-line18\n+eighteen"));
    }

    #[test]
    fn new_file_diff_starts_at_zero() {
        let diff = unified_diff("new.rs", "", "fn main() {}\n");
        assert!(diff.contains("@@ -0,0 +1,1 @@"));
        assert!(diff.ends_with("+fn main() {}"));
    }

    #[test]
    fn identical_texts_have_no_diff() {
        assert!(unified_diff("f", "same\n", "same\n").is_empty());
    }

    #[test]
    fn long_diffs_are_capped() {
        let new: String = (0..500).map(|i| format!("{i}\n")).collect();
        let diff = unified_diff("big", "", &new);
        assert_eq!(diff.lines().count(), MAX_DIFF_LINES + 1);
        assert!(diff.ends_with("more lines)"));
    }

    #[test]
    fn previews_read_current_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn a() {}\nfn b() {}\n").unwrap();

        let edit = preview(
            "edit_file",
            &json!({"path": "lib.rs", "old_string": "fn b() {}", "new_string": "fn c() {}"}),
            dir.path(),
        )
        .unwrap();
        assert!(edit.contains("-fn b() {}\n+fn c() {}"));

        let insert = preview(
            "insert_line",
            &json!({"path": "lib.rs", "line": 2, "content": "// between"}),
            dir.path(),
        )
        .unwrap();
        assert!(insert.contains("+// between"));

        let write = preview(
            "write_file",
            &json!({"path": "fresh.rs", "content": "x\n"}),
            dir.path(),
        )
        .unwrap();
        assert!(write.contains("+x"));

        assert!(
            preview(
                "edit_file",
                &json!({"path": "lib.rs", "old_string": "missing", "new_string": "y"}),
                dir.path()
            )
            .is_none()
        );
        assert!(preview("read_file", &json!({"path": "lib.rs"}), dir.path()).is_none());
    }

    #[test]
    fn insert_at_line_clamps_to_end() {
        assert_eq!(insert_at_line("a\nb\n", 1, "x"), "x\na\nb\n");
        assert_eq!(insert_at_line("a\nb\n", 99, "x"), "a\nb\nx\n");
        assert_eq!(insert_at_line("", 1, "x"), "x\n");
    }
}
