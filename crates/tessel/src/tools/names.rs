//! Canonical tool name constants and risk classes.
//!
//! All tool-name string literals should reference these constants. When a
//! tool is renamed, only this file needs to change.

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const EDIT_FILE: &str = "edit_file";
pub const INSERT_LINE: &str = "insert_line";
pub const PATCH_FILE: &str = "patch_file";
pub const LIST_FILES: &str = "list_files";
pub const GREP: &str = "grep";
pub const BASH: &str = "bash";

/// Tools that run processes.
pub const SHELL_TOOLS: &[&str] = &[BASH];

/// Tools that change files on disk.
pub const FILE_MUTATING_TOOLS: &[&str] = &[WRITE_FILE, EDIT_FILE, INSERT_LINE, PATCH_FILE];

/// Tools that require confirmation unless allow-listed.
pub const DESTRUCTIVE_TOOLS: &[&str] = &[BASH, WRITE_FILE, EDIT_FILE, INSERT_LINE, PATCH_FILE];

/// Tools known to have no side effects.
pub const READ_ONLY_TOOLS: &[&str] = &[READ_FILE, LIST_FILES, GREP];

pub fn is_shell_tool(name: &str) -> bool {
    SHELL_TOOLS.contains(&name)
}

pub fn is_file_mutating(name: &str) -> bool {
    FILE_MUTATING_TOOLS.contains(&name)
}

pub fn is_destructive(name: &str) -> bool {
    DESTRUCTIVE_TOOLS.contains(&name)
}

pub fn is_read_only(name: &str) -> bool {
    READ_ONLY_TOOLS.contains(&name)
}

/// Input keys that name a file or directory, in lookup order.
pub const PATH_KEYS: &[&str] = &["path", "file_path", "file"];

/// First non-empty path-like string in a tool input.
pub fn input_path(input: &serde_json::Value) -> Option<&str> {
    let obj = input.as_object()?;
    PATH_KEYS
        .iter()
        .filter_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classes_are_consistent() {
        for name in FILE_MUTATING_TOOLS.iter().chain(SHELL_TOOLS) {
            assert!(is_destructive(name));
            assert!(!is_read_only(name));
        }
    }

    #[test]
    fn input_path_checks_aliases() {
        assert_eq!(input_path(&json!({"file_path": "a.rs"})), Some("a.rs"));
        assert_eq!(input_path(&json!({"path": "", "file": "b.rs"})), Some("b.rs"));
        assert_eq!(input_path(&json!({"command": "ls"})), None);
        assert_eq!(input_path(&json!("nope")), None);
    }
}
