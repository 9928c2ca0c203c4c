//! Persisted allow-lists.
//!
//! Two JSON files may contribute entries: a global one (per user) and a
//! workspace one (per project). Both are merged at load. New entries are
//! appended to the global file when one is configured, else to the
//! workspace file. Existing entries are never rewritten or removed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::categories;
use crate::error::AgentError;
use crate::persist;

pub const APPROVAL_FILE_VERSION: u32 = 1;

/// An approved bash command pattern, e.g. `cargo test *`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApprovedPattern {
    pub pattern: String,
    pub approved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An approved built-in category, by id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApprovedCategory {
    pub category_id: String,
    pub approved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub type ApprovedPathPattern = ApprovedPattern;
pub type ApprovedPathCategory = ApprovedCategory;

/// On-disk layout of an approvals file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApprovalFile {
    pub version: u32,
    #[serde(default)]
    pub bash_patterns: Vec<ApprovedPattern>,
    #[serde(default)]
    pub bash_categories: Vec<ApprovedCategory>,
    #[serde(default)]
    pub path_patterns: Vec<ApprovedPathPattern>,
    #[serde(default)]
    pub path_categories: Vec<ApprovedPathCategory>,
}

impl Default for ApprovalFile {
    fn default() -> Self {
        Self {
            version: APPROVAL_FILE_VERSION,
            bash_patterns: Vec::new(),
            bash_categories: Vec::new(),
            path_patterns: Vec::new(),
            path_categories: Vec::new(),
        }
    }
}

impl ApprovalFile {
    fn merge(&mut self, other: ApprovalFile) {
        for p in other.bash_patterns {
            if !self.bash_patterns.iter().any(|e| e.pattern == p.pattern) {
                self.bash_patterns.push(p);
            }
        }
        for c in other.bash_categories {
            if !self.bash_categories.iter().any(|e| e.category_id == c.category_id) {
                self.bash_categories.push(c);
            }
        }
        for p in other.path_patterns {
            if !self.path_patterns.iter().any(|e| e.pattern == p.pattern) {
                self.path_patterns.push(p);
            }
        }
        for c in other.path_categories {
            if !self.path_categories.iter().any(|e| e.category_id == c.category_id) {
                self.path_categories.push(c);
            }
        }
    }
}

/// Where new entries go.
#[derive(Debug)]
struct WriteTarget {
    path: PathBuf,
    /// False when the file existed but could not be parsed. Writing would
    /// clobber whatever the user had in it.
    writable: bool,
}

#[derive(Debug)]
enum Loaded {
    Missing,
    Parsed(ApprovalFile),
    Malformed,
}

fn load_file(path: &Path) -> Loaded {
    match persist::read_json::<ApprovalFile>(path) {
        Ok(None) => Loaded::Missing,
        Ok(Some(file)) if file.version == APPROVAL_FILE_VERSION => Loaded::Parsed(file),
        Ok(Some(file)) => {
            warn!(
                "Ignoring approvals file {} with unsupported version {}",
                path.display(),
                file.version
            );
            Loaded::Malformed
        }
        Err(e) => {
            warn!("Ignoring unreadable approvals file {}: {e}", path.display());
            Loaded::Malformed
        }
    }
}

/// Merged view over the global and workspace approval files.
#[derive(Debug, Default)]
pub struct ApprovalStore {
    merged: ApprovalFile,
    target: Option<WriteTarget>,
}

impl ApprovalStore {
    /// An empty store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load and merge both files. Missing files count as empty; malformed
    /// ones are logged, treated as empty and never written to.
    pub fn load(global: Option<PathBuf>, workspace: Option<PathBuf>) -> Self {
        let mut merged = ApprovalFile::default();
        let mut target = None;

        for (path, is_target) in [
            (global.clone(), true),
            (workspace, global.is_none()),
        ] {
            let Some(path) = path else { continue };
            let (contents, writable) = match load_file(&path) {
                Loaded::Missing => (ApprovalFile::default(), true),
                Loaded::Parsed(file) => (file, true),
                Loaded::Malformed => (ApprovalFile::default(), false),
            };
            merged.merge(contents);
            if is_target {
                target = Some(WriteTarget {
                    path,
                    writable,
                });
            }
        }

        debug!(
            bash_patterns = merged.bash_patterns.len(),
            bash_categories = merged.bash_categories.len(),
            path_patterns = merged.path_patterns.len(),
            path_categories = merged.path_categories.len(),
            "Loaded approvals"
        );
        Self { merged, target }
    }

    pub fn entries(&self) -> &ApprovalFile {
        &self.merged
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Whether every segment of `command` is covered by an approved pattern
    /// or category. A segment with command or process substitution is never
    /// covered.
    pub fn is_command_approved(&self, command: &str) -> bool {
        let covered = |segment: &String| {
            self.merged
                .bash_patterns
                .iter()
                .any(|p| categories::command_matches_pattern(&p.pattern, segment))
                || self
                    .merged
                    .bash_categories
                    .iter()
                    .any(|c| categories::command_in_category(segment, &c.category_id))
        };
        let segments = categories::command_segments(command);
        !segments.is_empty()
            && segments
                .iter()
                .all(|segment| !categories::has_substitution(segment) && covered(segment))
    }

    pub fn is_path_approved(&self, path: &str) -> bool {
        self.merged
            .path_patterns
            .iter()
            .any(|p| categories::path_matches_pattern(&p.pattern, path))
            || self
                .merged
                .path_categories
                .iter()
                .any(|c| categories::path_in_category(path, &c.category_id))
    }

    // ── Appends ───────────────────────────────────────────────────

    /// Append a bash pattern. `Ok(false)` when it was already present.
    pub fn add_bash_pattern(
        &mut self,
        pattern: &str,
        description: Option<String>,
    ) -> Result<bool, AgentError> {
        if self.merged.bash_patterns.iter().any(|p| p.pattern == pattern) {
            return Ok(false);
        }
        let entry = ApprovedPattern {
            pattern: pattern.to_string(),
            approved_at: Utc::now(),
            description,
        };
        self.append(ApprovalFile {
            bash_patterns: vec![entry],
            ..Default::default()
        })?;
        Ok(true)
    }

    /// Append a bash category. Unknown ids are rejected.
    pub fn add_bash_category(
        &mut self,
        category_id: &str,
        description: Option<String>,
    ) -> Result<bool, AgentError> {
        if categories::bash_category(category_id).is_none() {
            return Err(AgentError::ApprovalStore(format!(
                "unknown bash category: {category_id}"
            )));
        }
        if self
            .merged
            .bash_categories
            .iter()
            .any(|c| c.category_id == category_id)
        {
            return Ok(false);
        }
        let entry = ApprovedCategory {
            category_id: category_id.to_string(),
            approved_at: Utc::now(),
            description,
        };
        self.append(ApprovalFile {
            bash_categories: vec![entry],
            ..Default::default()
        })?;
        Ok(true)
    }

    pub fn add_path_pattern(
        &mut self,
        pattern: &str,
        description: Option<String>,
    ) -> Result<bool, AgentError> {
        if self.merged.path_patterns.iter().any(|p| p.pattern == pattern) {
            return Ok(false);
        }
        let entry = ApprovedPathPattern {
            pattern: pattern.to_string(),
            approved_at: Utc::now(),
            description,
        };
        self.append(ApprovalFile {
            path_patterns: vec![entry],
            ..Default::default()
        })?;
        Ok(true)
    }

    pub fn add_path_category(
        &mut self,
        category_id: &str,
        description: Option<String>,
    ) -> Result<bool, AgentError> {
        if categories::path_category(category_id).is_none() {
            return Err(AgentError::ApprovalStore(format!(
                "unknown path category: {category_id}"
            )));
        }
        if self
            .merged
            .path_categories
            .iter()
            .any(|c| c.category_id == category_id)
        {
            return Ok(false);
        }
        let entry = ApprovedPathCategory {
            category_id: category_id.to_string(),
            approved_at: Utc::now(),
            description,
        };
        self.append(ApprovalFile {
            path_categories: vec![entry],
            ..Default::default()
        })?;
        Ok(true)
    }

    /// Merge `addition` into the target file as it is on disk now, then into
    /// the in-memory view. Entries another session wrote since load are kept
    /// and become visible here. Without a target only memory changes.
    fn append(&mut self, addition: ApprovalFile) -> Result<(), AgentError> {
        if let Some(target) = &self.target {
            let refuse = || {
                AgentError::ApprovalStore(format!(
                    "refusing to overwrite unreadable approvals file {}",
                    target.path.display()
                ))
            };
            if !target.writable {
                return Err(refuse());
            }
            let mut on_disk = match load_file(&target.path) {
                Loaded::Missing => ApprovalFile::default(),
                Loaded::Parsed(file) => file,
                Loaded::Malformed => return Err(refuse()),
            };
            on_disk.merge(addition.clone());
            persist::write_json_atomic(&target.path, &on_disk)?;
            self.merged.merge(on_disk);
        }
        self.merged.merge(addition);
        Ok(())
    }
}
