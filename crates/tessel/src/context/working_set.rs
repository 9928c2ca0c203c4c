//! Recently touched files and active entities.
//!
//! The [`WorkingSet`] biases retention during compaction: messages that
//! mention a tracked file or entity are kept regardless of score, and the
//! summarizer is told which files to stay aware of. Only the orchestrator
//! mutates it, right after dispatching each tool call; the scorer, window
//! selector and compressor read it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::ToolCall;
use crate::tools::names;

/// Default number of files remembered.
pub const DEFAULT_MAX_FILES: usize = 20;

/// Default number of entities remembered.
pub const DEFAULT_MAX_ENTITIES: usize = 50;

/// How a file was touched.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileAccessType {
    Read,
    Write,
    Search,
}

impl std::fmt::Display for FileAccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileAccessType::Read => write!(f, "read"),
            FileAccessType::Write => write!(f, "write"),
            FileAccessType::Search => write!(f, "search"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileAccess {
    pub path: String,
    pub access: FileAccessType,
    pub iteration: u32,
}

/// Files and entities under discussion in the current conversation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkingSet {
    files: VecDeque<FileAccess>,
    entities: VecDeque<String>,
    max_files: usize,
    max_entities: usize,
}

impl Default for WorkingSet {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILES, DEFAULT_MAX_ENTITIES)
    }
}

impl WorkingSet {
    pub fn new(max_files: usize, max_entities: usize) -> Self {
        Self {
            files: VecDeque::with_capacity(max_files),
            entities: VecDeque::new(),
            max_files,
            max_entities,
        }
    }

    /// Record the files and entities a tool call touches.
    ///
    /// Deduplicates by path: a re-touched file moves to the end with the
    /// updated iteration and access type.
    pub fn record_tool_call(&mut self, call: &ToolCall, iteration: u32) {
        let access = match call.name.as_str() {
            names::READ_FILE => FileAccessType::Read,
            n if names::is_file_mutating(n) => FileAccessType::Write,
            names::LIST_FILES | names::GREP => FileAccessType::Search,
            _ => return,
        };
        if let Some(path) = names::input_path(&call.input) {
            self.touch_file(path, access, iteration);
        }
        if call.name == names::GREP
            && let Some(pattern) = call.input_str("pattern")
        {
            self.add_entity(pattern);
        }
    }

    pub fn touch_file(&mut self, path: &str, access: FileAccessType, iteration: u32) {
        self.files.retain(|f| f.path != path);
        self.files.push_back(FileAccess {
            path: path.to_string(),
            access,
            iteration,
        });
        while self.files.len() > self.max_files {
            self.files.pop_front();
        }
    }

    pub fn add_entity(&mut self, entity: &str) {
        let entity = entity.trim();
        if entity.is_empty() {
            return;
        }
        self.entities.retain(|e| e != entity);
        self.entities.push_back(entity.to_string());
        while self.entities.len() > self.max_entities {
            self.entities.pop_front();
        }
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(String::as_str)
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.entities.is_empty()
    }

    /// Whether `text` mentions any tracked file or entity.
    pub fn is_referenced_by(&self, text: &str) -> bool {
        self.files().chain(self.entities()).any(|item| text.contains(item))
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.entities.clear();
    }

    /// Note handed to the summarizer so compaction keeps these in view.
    /// Empty when nothing is tracked.
    pub fn preservation_note(&self) -> String {
        let mut note = String::new();
        if !self.files.is_empty() {
            note.push_str("Recently touched files (preserve awareness of these):\n");
            for f in &self.files {
                note.push_str(&format!(
                    "- {} ({}, iteration {})\n",
                    f.path, f.access, f.iteration
                ));
            }
        }
        if !self.entities.is_empty() {
            note.push_str("Active entities: ");
            note.push_str(&self.entities.iter().cloned().collect::<Vec<_>>().join(", "));
            note.push('\n');
        }
        note
    }
}
