//! Keeping an unbounded conversation inside a per-model token budget.
//!
//! 1. **[`budget`]**: derives the [`ContextConfig`](budget::ContextConfig)
//!    for the active model, scaled by window tier.
//! 2. **[`scoring`]**: pure per-message retention scores.
//! 3. **[`windowing`]**: the hard message ceiling and the greedy keep/summarize
//!    partition.
//! 4. **[`summarizer`]**: folds evicted messages into a running summary.
//! 5. **[`compaction`]**: ties the above together before each request.
//! 6. **[`compression`]**: per-request entity abbreviation with a legend.
//!
//! [`working_set`] tracks the files and entities the agent is working on; it
//! biases scoring, windowing and summarization toward them.

pub mod budget;
pub mod compaction;
pub mod compression;
pub mod scoring;
pub mod summarizer;
pub mod windowing;
pub mod working_set;

pub use budget::{ContextBudget, ContextConfig, ContextUsage, DEFAULT_CHARS_PER_TOKEN};
pub use working_set::WorkingSet;

use serde::{Deserialize, Serialize};

use crate::Message;
use crate::context::windowing::{PruneReport, prune_note, strip_prune_note};

/// Everything compaction reads and rewrites: history, running summary and
/// working set.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub summary: Option<String>,
    pub working_set: WorkingSet,
    /// Messages dropped by the hard ceiling so far. Reported by a single note
    /// leading the summary.
    #[serde(default)]
    pub pruned_messages: usize,
}

impl ConversationState {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Count a hard-ceiling prune and refresh the note leading the summary.
    pub fn record_prune(&mut self, report: &PruneReport) {
        self.pruned_messages += report.removed;
        let body = self.summary_body().map(str::to_string);
        self.set_summary(body, report.limit);
    }

    /// The summary without its prune note.
    pub fn summary_body(&self) -> Option<&str> {
        self.summary
            .as_deref()
            .map(strip_prune_note)
            .filter(|body| !body.is_empty())
    }

    /// Note for the messages pruned so far, if any were.
    pub fn prune_note(&self, history_limit: usize) -> Option<String> {
        (self.pruned_messages > 0).then(|| prune_note(self.pruned_messages, history_limit))
    }

    /// Replace the summary body, keeping the prune note in front of it.
    pub fn set_summary(&mut self, body: Option<String>, history_limit: usize) {
        let body = body.map(|b| strip_prune_note(&b).to_string()).filter(|b| !b.is_empty());
        self.summary = match (self.prune_note(history_limit), body) {
            (Some(note), Some(body)) => Some(format!("{note}\n\n{body}")),
            (note, body) => note.or(body),
        };
    }

    /// System prompt with the running summary appended.
    pub fn system_prompt_with_summary(&self, base: &str) -> String {
        match self.summary.as_deref() {
            Some(summary) if !summary.is_empty() => {
                format!("{base}{}{summary}", summarizer::SUMMARY_HEADING)
            }
            _ => base.to_string(),
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.summary = None;
        self.working_set.clear();
        self.pruned_messages = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_prunes_share_one_note() {
        let mut state = ConversationState::default();
        state.record_prune(&PruneReport { removed: 3, limit: 8 });
        assert_eq!(state.summary, Some(prune_note(3, 8)));
        state.summary = Some(format!("{}\n\nEarlier work.", prune_note(3, 8)));
        state.record_prune(&PruneReport { removed: 2, limit: 8 });
        assert_eq!(
            state.summary.as_deref(),
            Some(format!("{}\n\nEarlier work.", prune_note(5, 8)).as_str())
        );
        assert_eq!(state.summary_body(), Some("Earlier work."));
    }

    #[test]
    fn set_summary_keeps_the_note_in_front() {
        let mut state = ConversationState::default();
        state.set_summary(Some("Only body.".into()), 8);
        assert_eq!(state.summary.as_deref(), Some("Only body."));

        state.pruned_messages = 4;
        state.set_summary(Some("New body.".into()), 8);
        assert_eq!(state.summary, Some(format!("{}\n\nNew body.", prune_note(4, 8))));
        state.set_summary(None, 8);
        assert_eq!(state.summary, Some(prune_note(4, 8)));
    }

    #[test]
    fn summary_goes_under_heading() {
        let mut state = ConversationState::default();
        assert_eq!(state.system_prompt_with_summary("base"), "base");
        state.summary = Some("Did things.".into());
        assert_eq!(
            state.system_prompt_with_summary("base"),
            "base\n\n## Previous Conversation Summary\nDid things."
        );
    }

    #[test]
    fn clear_resets_everything() {
        let mut state = ConversationState::from_messages(vec![Message::user("hi")]);
        state.summary = Some("s".into());
        state.working_set.add_entity("parse_header");
        state.pruned_messages = 7;
        state.clear();
        assert_eq!(state, ConversationState::default());
    }
}
