//! Danger heuristics for shell commands and file targets.
//!
//! A dangerous call always goes to the confirmation handler, even when a
//! persisted pattern or category would otherwise approve it. Only an
//! auto-approved tool skips confirmation.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::tools::names;

/// A user-supplied danger rule, as written in configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DangerPatternConfig {
    /// Regular expression matched against the command text.
    pub pattern: String,
    pub reason: String,
}

struct DangerPattern {
    regex: Regex,
    reason: String,
}

const BUILTIN_COMMAND_PATTERNS: &[(&str, &str)] = &[
    (r"\brm\s+(-[a-zA-Z]*[rR][a-zA-Z]*\s+-[a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*[rR]|-[a-zA-Z]*[rR][a-zA-Z]*f)", "recursive forced delete"),
    (r"(^|[;&|]\s*)sudo\b", "runs with elevated privileges"),
    (r"\bmkfs(\.\w+)?\b", "formats a filesystem"),
    (r"\bdd\s+.*\bif=", "raw disk copy"),
    (r">\s*/dev/(sd|nvme|hd|disk)", "writes to a block device"),
    (r"\bchmod\s+(-R\s+)?0?777\b", "makes files world-writable"),
    (r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(ba|z)?sh\b", "pipes a download into a shell"),
    (r"\bgit\s+push\b.*(--force\b|-f\b)", "force-pushes git history"),
    (r"\bgit\s+reset\s+--hard\b", "discards uncommitted work"),
    (r"\bgit\s+clean\s+-[a-zA-Z]*f", "deletes untracked files"),
    (r":\(\)\s*\{\s*:\|:&\s*\};:", "fork bomb"),
    (r"\b(shutdown|reboot|halt|poweroff)\b", "stops the machine"),
    (r"\bkill\s+-9\s+(-1|1)\b", "kills every process"),
];

/// Path fragments that mark a write target as sensitive.
const SENSITIVE_PATH_PARTS: &[(&str, &str)] = &[
    (".ssh/", "touches SSH keys"),
    (".aws/", "touches cloud credentials"),
    (".gnupg/", "touches GPG keys"),
    (".git/", "edits git internals"),
    (".env", "touches an environment file"),
];

const SYSTEM_DIRS: &[&str] = &["/etc/", "/usr/", "/bin/", "/sbin/", "/boot/", "/sys/", "/proc/"];

static BUILTIN: LazyLock<Vec<DangerPattern>> = LazyLock::new(|| {
    BUILTIN_COMMAND_PATTERNS
        .iter()
        .map(|(pattern, reason)| DangerPattern {
            regex: Regex::new(pattern).expect("builtin danger pattern is valid"),
            reason: (*reason).to_string(),
        })
        .collect()
});

/// Matches tool calls against the built-in and user danger rules.
pub struct DangerDetector {
    user: Vec<DangerPattern>,
}

impl DangerDetector {
    /// Built-in rules plus `user`. Invalid user regexes are logged and skipped.
    pub fn new(user: &[DangerPatternConfig]) -> Self {
        let user = user
            .iter()
            .filter_map(|p| match Regex::new(&p.pattern) {
                Ok(regex) => Some(DangerPattern {
                    regex,
                    reason: p.reason.clone(),
                }),
                Err(e) => {
                    warn!("Ignoring invalid danger pattern {:?}: {e}", p.pattern);
                    None
                }
            })
            .collect();
        Self { user }
    }

    /// Reason the command is dangerous, if any rule matches.
    pub fn check_command(&self, command: &str) -> Option<String> {
        BUILTIN
            .iter()
            .chain(&self.user)
            .find(|p| p.regex.is_match(command))
            .map(|p| p.reason.clone())
    }

    /// Reason writing `path` is dangerous, if any.
    pub fn check_path(&self, path: &str) -> Option<String> {
        if path.split('/').any(|part| part == "..") {
            return Some("path escapes the working directory".into());
        }
        if SYSTEM_DIRS.iter().any(|dir| path.starts_with(dir)) {
            return Some("writes to a system directory".into());
        }
        SENSITIVE_PATH_PARTS
            .iter()
            .find(|(part, _)| {
                path.contains(part) || path.ends_with(part.trim_end_matches('/'))
            })
            .map(|(_, reason)| (*reason).to_string())
    }

    /// Danger reason for a normalized tool input.
    pub fn check(&self, tool_name: &str, input: &serde_json::Value) -> Option<String> {
        if names::is_shell_tool(tool_name) {
            let command = input.get("command").and_then(|v| v.as_str())?;
            self.check_command(command)
        } else if names::is_file_mutating(tool_name) {
            self.check_path(names::input_path(input)?)
        } else {
            None
        }
    }
}

impl Default for DangerDetector {
    fn default() -> Self {
        Self::new(&[])
    }
}
