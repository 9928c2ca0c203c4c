//! The approval gate: decides, per tool call, whether a human has to say yes.
//!
//! Order of checks:
//!
//! 1. Input normalization (`cmd` arrays, `sh -c` wrappers, path aliases).
//! 2. Auto-approve (every tool, or this tool by name).
//! 3. Danger heuristics. A dangerous call always goes to the handler.
//! 4. Persisted bash patterns and categories for shell tools.
//! 5. Persisted path patterns and categories for file-mutating tools.
//! 6. Destructive tools that are still unresolved go to the handler.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::categories::{self, CategoryInfo};
use super::danger::{DangerDetector, DangerPatternConfig};
use super::diff;
use super::store::ApprovalStore;
use crate::ToolCall;
use crate::tools::names;

/// What the user decided for one confirmation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationResult {
    /// Run this call once.
    Approve,
    /// Skip the call. Reported to the model as an error result.
    Deny,
    /// Stop the whole loop now.
    Abort,
    /// Run once and persist the pattern for future calls.
    ApprovePattern(String),
    /// Run once and persist the category (by id) for future calls.
    ApproveCategory(String),
}

/// Everything a confirmation UI needs to ask about one call.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub call: ToolCall,
    /// Why the call looks dangerous, if it does.
    pub danger: Option<String>,
    /// Unified diff against the file on disk, for write/edit/insert calls.
    pub diff: Option<String>,
    pub suggested_patterns: Vec<String>,
    pub suggested_categories: Vec<CategoryInfo>,
}

impl ConfirmationRequest {
    pub fn is_dangerous(&self) -> bool {
        self.danger.is_some()
    }
}

/// Boxed future returned by [`ConfirmationHandler::confirm`].
pub type ConfirmFuture<'a> = Pin<Box<dyn Future<Output = ConfirmationResult> + Send + 'a>>;

/// Asks a human (or a policy) about a tool call. The loop waits on this
/// indefinitely.
pub trait ConfirmationHandler: Send + Sync {
    fn confirm<'a>(&'a self, request: &'a ConfirmationRequest) -> ConfirmFuture<'a>;
}

/// Why a call went through without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    AutoApproved,
    ApprovedCommand,
    ApprovedPath,
    NotDestructive,
}

/// Result of the non-interactive checks.
#[derive(Debug, Clone)]
pub enum GateDecision {
    Allowed(AllowReason),
    NeedsConfirmation(ConfirmationRequest),
}

/// Final verdict for a call after any confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Denied,
    Aborted,
}

pub struct ApprovalGate {
    auto_approve_all: bool,
    auto_approve_tools: HashSet<String>,
    danger: DangerDetector,
    store: Mutex<ApprovalStore>,
    workdir: PathBuf,
    handler: Option<Arc<dyn ConfirmationHandler>>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalGate {
    /// In-memory store, built-in danger rules, no handler. Without a handler
    /// every call that needs confirmation is denied.
    pub fn new() -> Self {
        Self {
            auto_approve_all: false,
            auto_approve_tools: HashSet::new(),
            danger: DangerDetector::default(),
            store: Mutex::new(ApprovalStore::in_memory()),
            workdir: PathBuf::from("."),
            handler: None,
        }
    }

    pub fn with_auto_approve_all(mut self, yes: bool) -> Self {
        self.auto_approve_all = yes;
        self
    }

    pub fn with_auto_approve_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_approve_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_danger_patterns(mut self, patterns: &[DangerPatternConfig]) -> Self {
        self.danger = DangerDetector::new(patterns);
        self
    }

    pub fn with_store(mut self, store: ApprovalStore) -> Self {
        self.store = Mutex::new(store);
        self
    }

    /// Directory relative paths are resolved against for diff previews.
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run `f` against the approval store.
    pub fn with_store_ref<R>(&self, f: impl FnOnce(&ApprovalStore) -> R) -> R {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        f(&store)
    }

    fn is_auto_approved(&self, tool_name: &str) -> bool {
        self.auto_approve_all || self.auto_approve_tools.contains(tool_name)
    }

    // ── Decision ──────────────────────────────────────────────────

    /// Non-interactive checks for an already-normalized call.
    pub fn evaluate(&self, call: &ToolCall) -> GateDecision {
        if self.is_auto_approved(&call.name) {
            return GateDecision::Allowed(AllowReason::AutoApproved);
        }

        let danger = self.danger.check(&call.name, &call.input);
        let is_shell = names::is_shell_tool(&call.name);
        let is_file = names::is_file_mutating(&call.name);

        if danger.is_none() {
            let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            if is_shell
                && let Some(command) = call.input_str("command")
                && store.is_command_approved(command)
            {
                return GateDecision::Allowed(AllowReason::ApprovedCommand);
            }
            if is_file
                && let Some(path) = names::input_path(&call.input)
                && store.is_path_approved(path)
            {
                return GateDecision::Allowed(AllowReason::ApprovedPath);
            }
        }

        if danger.is_none() && !names::is_destructive(&call.name) {
            return GateDecision::Allowed(AllowReason::NotDestructive);
        }

        let (suggested_patterns, suggested_categories) = if is_shell {
            call.input_str("command")
                .map(suggest_for_command)
                .unwrap_or_default()
        } else if is_file {
            names::input_path(&call.input)
                .map(suggest_for_path)
                .unwrap_or_default()
        } else {
            Default::default()
        };

        GateDecision::NeedsConfirmation(ConfirmationRequest {
            call: call.clone(),
            diff: is_file
                .then(|| diff::preview(&call.name, &call.input, &self.workdir))
                .flatten(),
            danger,
            suggested_patterns,
            suggested_categories,
        })
    }

    /// Normalize `call` in place, evaluate it, and ask the handler when
    /// needed. Approve-pattern and approve-category persist before the call
    /// runs; a later failure of the call does not roll the approval back.
    pub async fn review(&self, call: &mut ToolCall) -> Verdict {
        normalize_input(call);

        let request = match self.evaluate(call) {
            GateDecision::Allowed(reason) => {
                debug!(tool = %call.name, ?reason, "Tool call allowed");
                return Verdict::Approved;
            }
            GateDecision::NeedsConfirmation(request) => request,
        };

        let Some(handler) = &self.handler else {
            warn!(tool = %call.name, "No confirmation handler; denying tool call");
            return Verdict::Denied;
        };

        match handler.confirm(&request).await {
            ConfirmationResult::Approve => Verdict::Approved,
            ConfirmationResult::Deny => Verdict::Denied,
            ConfirmationResult::Abort => Verdict::Aborted,
            ConfirmationResult::ApprovePattern(pattern) => {
                self.remember_pattern(&call.name, &pattern);
                Verdict::Approved
            }
            ConfirmationResult::ApproveCategory(category_id) => {
                self.remember_category(&call.name, &category_id);
                Verdict::Approved
            }
        }
    }

    fn remember_pattern(&self, tool_name: &str, pattern: &str) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let result = if names::is_file_mutating(tool_name) {
            store.add_path_pattern(pattern, None)
        } else {
            store.add_bash_pattern(pattern, None)
        };
        match result {
            Ok(true) => info!(tool = %tool_name, %pattern, "Saved approval pattern"),
            Ok(false) => debug!(%pattern, "Approval pattern already present"),
            Err(e) => warn!("Failed to save approval pattern {pattern:?}: {e}"),
        }
    }

    fn remember_category(&self, tool_name: &str, category_id: &str) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let result = if names::is_file_mutating(tool_name) {
            store.add_path_category(category_id, None)
        } else {
            store.add_bash_category(category_id, None)
        };
        match result {
            Ok(true) => info!(tool = %tool_name, category = %category_id, "Saved approval category"),
            Ok(false) => debug!(category = %category_id, "Approval category already present"),
            Err(e) => warn!("Failed to save approval category {category_id:?}: {e}"),
        }
    }
}

// ── Normalization ─────────────────────────────────────────────────

/// Rewrite alternate input shapes into the canonical ones tools expect:
/// shell `cmd` (array or string) becomes `command`, `["sh", "-c", X]`
/// becomes `X`, and `file_path`/`file` become `path`.
pub fn normalize_input(call: &mut ToolCall) {
    let Some(obj) = call.input.as_object_mut() else {
        return;
    };

    if names::is_shell_tool(&call.name) && !obj.contains_key("command") {
        if let Some(cmd) = obj.remove("cmd") {
            let command = match cmd {
                Value::String(s) => Some(s),
                Value::Array(parts) => {
                    let parts: Vec<String> = parts
                        .iter()
                        .filter_map(|p| p.as_str().map(str::to_string))
                        .collect();
                    match parts.as_slice() {
                        [shell, flag, script]
                            if matches!(shell.as_str(), "sh" | "bash" | "/bin/sh" | "/bin/bash")
                                && flag == "-c" =>
                        {
                            Some(script.clone())
                        }
                        [] => None,
                        _ => Some(parts.join(" ")),
                    }
                }
                _ => None,
            };
            if let Some(command) = command {
                obj.insert("command".into(), Value::String(command));
            }
        }
    }

    if !obj.contains_key("path") {
        for alias in ["file_path", "file"] {
            if let Some(value) = obj.remove(alias) {
                obj.insert("path".into(), value);
                break;
            }
        }
    }
}

// ── Suggestions ───────────────────────────────────────────────────

/// Patterns and categories the user could approve for `command`.
pub fn suggest_for_command(command: &str) -> (Vec<String>, Vec<CategoryInfo>) {
    let mut patterns = Vec::new();
    let mut cats: Vec<CategoryInfo> = Vec::new();
    for segment in categories::command_segments(command) {
        let words: Vec<&str> = segment.split_whitespace().collect();
        let prefix = match words.as_slice() {
            [first, second, ..] if !second.starts_with('-') => format!("{first} {second}"),
            [first, ..] => (*first).to_string(),
            [] => continue,
        };
        let pattern = format!("{prefix} *");
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
        for id in categories::bash_categories_for(&segment) {
            if let Some(info) = categories::bash_category(id)
                && !cats.iter().any(|c| c.id == id)
            {
                cats.push(*info);
            }
        }
    }
    (patterns, cats)
}

/// Patterns and categories the user could approve for writes to `path`.
pub fn suggest_for_path(path: &str) -> (Vec<String>, Vec<CategoryInfo>) {
    let path = path.trim_start_matches("./");
    let mut patterns = Vec::new();
    let p = Path::new(path);
    if let Some(ext) = p.extension().and_then(|e| e.to_str()) {
        match p.parent().and_then(|d| d.to_str()).filter(|d| !d.is_empty()) {
            Some(dir) => patterns.push(format!("{dir}/*.{ext}")),
            None => patterns.push(format!("*.{ext}")),
        }
        patterns.push(format!("**/*.{ext}"));
    } else {
        patterns.push(path.to_string());
    }
    let cats = categories::path_categories_for(path)
        .into_iter()
        .filter_map(categories::path_category)
        .copied()
        .collect();
    (patterns, cats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConfirmer;
    use serde_json::json;

    fn call(name: &str, input: Value) -> ToolCall {
        ToolCall::new("c1", name, input)
    }

    #[test]
    fn cmd_array_and_sh_wrapper_are_normalized() {
        let mut c = call("bash", json!({"cmd": ["sh", "-c", "ls -la && pwd"]}));
        normalize_input(&mut c);
        assert_eq!(c.input, json!({"command": "ls -la && pwd"}));

        let mut c = call("bash", json!({"cmd": ["git", "status"]}));
        normalize_input(&mut c);
        assert_eq!(c.input_str("command"), Some("git status"));

        let mut c = call("bash", json!({"cmd": "echo hi"}));
        normalize_input(&mut c);
        assert_eq!(c.input_str("command"), Some("echo hi"));

        let mut c = call("write_file", json!({"file_path": "a.rs", "content": ""}));
        normalize_input(&mut c);
        assert_eq!(c.input_str("path"), Some("a.rs"));
        assert!(c.input.get("file_path").is_none());
    }

    #[test]
    fn read_only_tools_pass_and_destructive_ones_ask() {
        let gate = ApprovalGate::new();
        assert!(matches!(
            gate.evaluate(&call("read_file", json!({"path": "a.rs"}))),
            GateDecision::Allowed(AllowReason::NotDestructive)
        ));
        assert!(matches!(
            gate.evaluate(&call("bash", json!({"command": "ls"}))),
            GateDecision::NeedsConfirmation(_)
        ));
    }

    #[test]
    fn auto_approve_skips_everything() {
        let gate = ApprovalGate::new().with_auto_approve_tools(["bash"]);
        assert!(matches!(
            gate.evaluate(&call("bash", json!({"command": "sudo rm -rf /"}))),
            GateDecision::Allowed(AllowReason::AutoApproved)
        ));
        let gate = ApprovalGate::new().with_auto_approve_all(true);
        assert!(matches!(
            gate.evaluate(&call("write_file", json!({"path": "/etc/x"}))),
            GateDecision::Allowed(AllowReason::AutoApproved)
        ));
    }

    #[test]
    fn approved_pattern_allows_but_danger_still_asks() {
        let mut store = ApprovalStore::in_memory();
        store.add_bash_pattern("git *", None).unwrap();
        let gate = ApprovalGate::new().with_store(store);

        assert!(matches!(
            gate.evaluate(&call("bash", json!({"command": "git log --oneline"}))),
            GateDecision::Allowed(AllowReason::ApprovedCommand)
        ));
        match gate.evaluate(&call("bash", json!({"command": "git push --force"}))) {
            GateDecision::NeedsConfirmation(req) => assert!(req.is_dangerous()),
            other => panic!("expected confirmation, got {other:?}"),
        }
    }

    #[test]
    fn approved_path_category_allows_writes() {
        let mut store = ApprovalStore::in_memory();
        store.add_path_category("docs", None).unwrap();
        let gate = ApprovalGate::new().with_store(store);
        assert!(matches!(
            gate.evaluate(&call("write_file", json!({"path": "docs/a.md", "content": "x"}))),
            GateDecision::Allowed(AllowReason::ApprovedPath)
        ));
        assert!(matches!(
            gate.evaluate(&call("write_file", json!({"path": "src/a.rs", "content": "x"}))),
            GateDecision::NeedsConfirmation(_)
        ));
    }

    #[test]
    fn confirmation_request_carries_diff_and_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "old\n").unwrap();
        let gate = ApprovalGate::new().with_workdir(dir.path());

        let GateDecision::NeedsConfirmation(req) = gate.evaluate(&call(
            "write_file",
            json!({"path": "main.rs", "content": "new\n"}),
        )) else {
            panic!("expected confirmation");
        };
        assert!(!req.is_dangerous());
        assert!(req.diff.as_deref().unwrap().contains("-old\n+new"));

        let GateDecision::NeedsConfirmation(req) =
            gate.evaluate(&call("bash", json!({"command": "cargo test --lib && git status"})))
        else {
            panic!("expected confirmation");
        };
        assert_eq!(req.suggested_patterns, vec!["cargo test *", "git status *"]);
        let ids: Vec<&str> = req.suggested_categories.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["test", "git-read"]);
        assert!(req.diff.is_none());
    }

    #[test]
    fn path_suggestions() {
        let (patterns, cats) = suggest_for_path("./src/agent/mod.rs");
        assert_eq!(patterns, vec!["src/agent/*.rs", "**/*.rs"]);
        assert_eq!(cats[0].id, "source-files");
        let (patterns, _) = suggest_for_path("Makefile");
        assert_eq!(patterns, vec!["Makefile"]);
    }

    #[tokio::test]
    async fn no_handler_means_deny() {
        let gate = ApprovalGate::new();
        let mut c = call("bash", json!({"command": "ls"}));
        assert_eq!(gate.review(&mut c).await, Verdict::Denied);
    }

    #[tokio::test]
    async fn handler_results_map_to_verdicts() {
        let confirmer = Arc::new(ScriptedConfirmer::new(vec![
            ConfirmationResult::Deny,
            ConfirmationResult::Abort,
            ConfirmationResult::Approve,
        ]));
        let gate = ApprovalGate::new().with_handler(confirmer.clone());
        let mut c = call("bash", json!({"cmd": ["make"]}));
        assert_eq!(gate.review(&mut c).await, Verdict::Denied);
        assert_eq!(gate.review(&mut c).await, Verdict::Aborted);
        assert_eq!(gate.review(&mut c).await, Verdict::Approved);
        assert_eq!(confirmer.seen().len(), 3);
        assert_eq!(confirmer.seen()[0].call.input_str("command"), Some("make"));
    }

    #[tokio::test]
    async fn approve_pattern_persists_before_execution() {
        let confirmer = Arc::new(ScriptedConfirmer::new(vec![
            ConfirmationResult::ApprovePattern("cargo test *".into()),
        ]));
        let gate = ApprovalGate::new().with_handler(confirmer.clone());

        let mut first = call("bash", json!({"command": "cargo test"}));
        assert_eq!(gate.review(&mut first).await, Verdict::Approved);
        // The pattern stands even though the call has not run yet, and is
        // not withdrawn if it later fails.
        assert!(gate.with_store_ref(|s| s.is_command_approved("cargo test --doc")));

        let mut second = call("bash", json!({"command": "cargo test -p tessel"}));
        assert_eq!(gate.review(&mut second).await, Verdict::Approved);
        assert_eq!(confirmer.seen().len(), 1);
    }

    #[tokio::test]
    async fn approve_category_for_file_tools_uses_path_categories() {
        let confirmer = Arc::new(ScriptedConfirmer::new(vec![
            ConfirmationResult::ApproveCategory("test-files".into()),
        ]));
        let dir = tempfile::tempdir().unwrap();
        let gate = ApprovalGate::new()
            .with_workdir(dir.path())
            .with_handler(confirmer.clone());
        let mut c = call("write_file", json!({"path": "tests/a.rs", "content": "x"}));
        assert_eq!(gate.review(&mut c).await, Verdict::Approved);
        assert!(gate.with_store_ref(|s| s.is_path_approved("tests/b.rs")));
    }
}
