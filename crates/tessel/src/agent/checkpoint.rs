//! Checkpoints and branches for rewinding a conversation.
//!
//! Each checkpoint is one file, `checkpoints/<id>.json`, holding a
//! [`CheckpointRecord`]. Branch topology and the active branch live in
//! `timeline.json` as a [`TimelineRecord`]. Both carry a format version;
//! records with an unknown version are rejected rather than guessed at.
//!
//! ```text
//! <dir>/
//!   timeline.json
//!   checkpoints/
//!     cp-0001.json
//!     cp-0002.json
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::ConversationState;
use crate::error::AgentError;
use crate::persist::{read_json, write_json_atomic};

/// Current on-disk format of both record types.
pub const RECORD_VERSION: u32 = 1;

/// Name of the branch a fresh timeline starts on.
pub const MAIN_BRANCH: &str = "main";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from(".tessel/checkpoints"),
        }
    }
}

/// Snapshot of the agent state after one iteration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub version: u32,
    pub id: String,
    pub branch: String,
    pub iteration: u32,
    pub created_at: DateTime<Utc>,
    pub state: ConversationState,
}

impl CheckpointRecord {
    pub fn capture(id: String, branch: String, iteration: u32, state: &ConversationState) -> Self {
        Self {
            version: RECORD_VERSION,
            id,
            branch,
            iteration,
            created_at: Utc::now(),
            state: state.clone(),
        }
    }

    pub fn into_state(self) -> ConversationState {
        self.state
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BranchRecord {
    pub name: String,
    /// Checkpoint this branch was forked from; `None` for the main branch.
    pub forked_from: Option<String>,
    /// Checkpoint ids in creation order.
    pub checkpoints: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TimelineRecord {
    pub version: u32,
    pub active_branch: String,
    pub branches: Vec<BranchRecord>,
    pub next_id: u64,
}

impl Default for TimelineRecord {
    fn default() -> Self {
        Self {
            version: RECORD_VERSION,
            active_branch: MAIN_BRANCH.to_string(),
            branches: vec![BranchRecord {
                name: MAIN_BRANCH.to_string(),
                forked_from: None,
                checkpoints: Vec::new(),
            }],
            next_id: 1,
        }
    }
}

impl TimelineRecord {
    fn branch(&self, name: &str) -> Option<&BranchRecord> {
        self.branches.iter().find(|b| b.name == name)
    }

    fn branch_mut(&mut self, name: &str) -> Option<&mut BranchRecord> {
        self.branches.iter_mut().find(|b| b.name == name)
    }

    fn contains(&self, id: &str) -> bool {
        self.branches
            .iter()
            .any(|b| b.checkpoints.iter().any(|c| c == id))
    }
}

/// One line of [`CheckpointStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub id: String,
    pub iteration: u32,
    pub messages: usize,
    pub created_at: DateTime<Utc>,
}

pub struct CheckpointStore {
    dir: PathBuf,
    timeline: TimelineRecord,
}

impl CheckpointStore {
    /// Open the store at `dir`, creating an empty timeline when none exists.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let dir = dir.into();
        let timeline = match read_json::<TimelineRecord>(&dir.join("timeline.json"))? {
            Some(t) if t.version == RECORD_VERSION => t,
            Some(t) => {
                return Err(AgentError::Checkpoint(format!(
                    "unsupported timeline version {}",
                    t.version
                )));
            }
            None => TimelineRecord::default(),
        };
        debug!(
            "Opened checkpoint store at {} ({} branches)",
            dir.display(),
            timeline.branches.len()
        );
        Ok(Self { dir, timeline })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn timeline(&self) -> &TimelineRecord {
        &self.timeline
    }

    pub fn active_branch(&self) -> &str {
        &self.timeline.active_branch
    }

    fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.dir.join("checkpoints").join(format!("{id}.json"))
    }

    fn save_timeline(&self) -> Result<(), AgentError> {
        write_json_atomic(&self.dir.join("timeline.json"), &self.timeline)
    }

    /// Snapshot `state` onto the active branch. Returns the new id.
    pub fn create(&mut self, state: &ConversationState, iteration: u32) -> Result<String, AgentError> {
        let id = format!("cp-{:04}", self.timeline.next_id);
        let branch_name = self.timeline.active_branch.clone();
        let record = CheckpointRecord::capture(id.clone(), branch_name.clone(), iteration, state);
        write_json_atomic(&self.checkpoint_path(&id), &record)?;

        self.timeline.next_id += 1;
        let branch = self
            .timeline
            .branch_mut(&branch_name)
            .ok_or_else(|| AgentError::Checkpoint(format!("unknown branch '{branch_name}'")))?;
        branch.checkpoints.push(id.clone());
        self.save_timeline()?;
        debug!("Saved checkpoint {id} on {branch_name} (iteration {iteration})");
        Ok(id)
    }

    pub fn load(&self, id: &str) -> Result<CheckpointRecord, AgentError> {
        let record: CheckpointRecord = read_json(&self.checkpoint_path(id))?
            .ok_or_else(|| AgentError::Checkpoint(format!("no checkpoint '{id}'")))?;
        if record.version != RECORD_VERSION {
            return Err(AgentError::Checkpoint(format!(
                "checkpoint '{id}' has unsupported version {}",
                record.version
            )));
        }
        Ok(record)
    }

    /// Start branch `name` at checkpoint `from`, make it active, and return
    /// the state to resume from.
    pub fn fork(&mut self, from: &str, name: &str) -> Result<ConversationState, AgentError> {
        if self.timeline.branch(name).is_some() {
            return Err(AgentError::Checkpoint(format!("branch '{name}' already exists")));
        }
        if !self.timeline.contains(from) {
            return Err(AgentError::Checkpoint(format!("no checkpoint '{from}'")));
        }
        let record = self.load(from)?;
        self.timeline.branches.push(BranchRecord {
            name: name.to_string(),
            forked_from: Some(from.to_string()),
            checkpoints: Vec::new(),
        });
        self.timeline.active_branch = name.to_string();
        self.save_timeline()?;
        info!("Forked branch '{name}' from {from}");
        Ok(record.into_state())
    }

    /// Make `name` active. Returns the state at its latest checkpoint (or
    /// its fork point), or `None` for a branch with neither.
    pub fn switch_branch(&mut self, name: &str) -> Result<Option<ConversationState>, AgentError> {
        let branch = self
            .timeline
            .branch(name)
            .ok_or_else(|| AgentError::Checkpoint(format!("unknown branch '{name}'")))?;
        let head = branch
            .checkpoints
            .last()
            .or(branch.forked_from.as_ref())
            .cloned();
        self.timeline.active_branch = name.to_string();
        self.save_timeline()?;
        head.map(|id| self.load(&id).map(CheckpointRecord::into_state))
            .transpose()
    }

    /// Checkpoints on the active branch, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointSummary>, AgentError> {
        let Some(branch) = self.timeline.branch(&self.timeline.active_branch) else {
            return Ok(Vec::new());
        };
        branch
            .checkpoints
            .iter()
            .map(|id| {
                let record = self.load(id)?;
                Ok(CheckpointSummary {
                    id: record.id,
                    iteration: record.iteration,
                    messages: record.state.messages.len(),
                    created_at: record.created_at,
                })
            })
            .collect()
    }

    /// Drop every checkpoint after `id` on the active branch and return the
    /// state at `id`. Files stay on disk; other branches may fork from them.
    pub fn rewind(&mut self, id: &str) -> Result<ConversationState, AgentError> {
        let active = self.timeline.active_branch.clone();
        let branch = self
            .timeline
            .branch_mut(&active)
            .ok_or_else(|| AgentError::Checkpoint(format!("unknown branch '{active}'")))?;
        let position = branch
            .checkpoints
            .iter()
            .position(|c| c == id)
            .ok_or_else(|| AgentError::Checkpoint(format!("'{id}' is not on branch '{active}'")))?;
        let dropped = branch.checkpoints.len() - position - 1;
        branch.checkpoints.truncate(position + 1);
        let record = self.load(id)?;
        self.save_timeline()?;
        info!("Rewound branch '{active}' to {id} ({dropped} later checkpoints dropped)");
        Ok(record.into_state())
    }
}
