//! Coding-agent configuration.
//!
//! [`CodeConfig`] is read from `<workdir>/.tessel/config.json` when that file
//! exists. Every field is optional; the `agent` section takes the same
//! shape as [`AgentConfig`]:
//!
//! ```json
//! {
//!   "model": "anthropic/claude-sonnet-4",
//!   "agent": { "max_iterations": 30, "auto_approve_tools": ["read_file"] }
//! }
//! ```
//!
//! Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessel::AgentError;
use tessel::agent::AgentConfig;
use tessel::approval::ApprovalStore;
use tessel::tools::ToolSet;
use tracing::debug;

use crate::prompt::coding_system_prompt;

pub const CONFIG_DIR: &str = ".tessel";
pub const CONFIG_FILE: &str = "config.json";
pub const APPROVALS_FILE: &str = "approvals.json";
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CodeConfig {
    pub model: String,
    /// Overrides `TESSEL_BASE_URL` and the built-in default.
    pub base_url: Option<String>,
    /// Replaces the built-in coding prompt.
    pub system_prompt: Option<String>,
    pub agent: AgentConfig,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            system_prompt: None,
            agent: AgentConfig::default(),
        }
    }
}

impl CodeConfig {
    /// Load the workspace config. A missing file yields the defaults; a
    /// malformed one is an error.
    pub fn load(workdir: &Path) -> Result<Self, AgentError> {
        let path = workdir.join(CONFIG_DIR).join(CONFIG_FILE);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<Self>(&raw)
                .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.resolve_paths(workdir);
        Ok(config)
    }

    /// Anchor relative paths at the working directory.
    fn resolve_paths(&mut self, workdir: &Path) {
        let dir = &self.agent.checkpoint.dir;
        if dir.is_relative() {
            self.agent.checkpoint.dir = workdir.join(dir);
        }
    }

    pub fn system_prompt(&self) -> String {
        self.system_prompt
            .clone()
            .unwrap_or_else(coding_system_prompt)
    }

    /// Built-in file, search and shell tools rooted at `workdir`.
    pub fn build_tool_set(&self, workdir: &Path) -> ToolSet {
        ToolSet::new().with_common_tools(workdir.to_string_lossy().into_owned())
    }

    /// Approvals merged from the user's global file and the workspace file.
    /// New approvals go to the global file.
    pub fn approval_store(&self, workdir: &Path) -> ApprovalStore {
        ApprovalStore::load(
            global_approvals_path(),
            Some(workdir.join(CONFIG_DIR).join(APPROVALS_FILE)),
        )
    }
}

fn global_approvals_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tessel").join(APPROVALS_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CodeConfig::load(dir.path()).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.agent.max_iterations, 50);
        assert!(config.agent.checkpoint.dir.starts_with(dir.path()));
        assert!(config.system_prompt().contains("coding assistant"));
    }

    #[test]
    fn partial_file_is_merged_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_DIR).join(CONFIG_FILE),
            r#"{"model": "local/qwen", "agent": {"max_iterations": 9, "compression": {"enabled": true}}}"#,
        )
        .unwrap();
        let config = CodeConfig::load(dir.path()).unwrap();
        assert_eq!(config.model, "local/qwen");
        assert_eq!(config.agent.max_iterations, 9);
        assert!(config.agent.compression.enabled);
        assert_eq!(config.agent.max_consecutive_errors, 3);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(dir.path().join(CONFIG_DIR).join(CONFIG_FILE), "{ nope").unwrap();
        let err = CodeConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn tool_set_has_the_builtin_tools() {
        let dir = tempfile::tempdir().unwrap();
        let tools = CodeConfig::default().build_tool_set(dir.path());
        let names: Vec<&str> = tools.names().collect();
        for expected in ["bash", "edit_file", "grep", "insert_line", "list_files", "read_file", "write_file"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }
}
