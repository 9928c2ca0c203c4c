//! Compaction: hard ceiling, then score, window and summarize.
//!
//! Runs before every provider request. The message ceiling is enforced
//! unconditionally; the scoring and summarization pass runs only when the
//! estimated history exceeds the budget's effective limit. Summarization
//! failure is recovered locally: the window is still applied, the prior
//! summary is kept, and the failure is logged.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::ConversationState;
use crate::context::budget::ContextBudget;
use crate::context::scoring::{ScoringContext, ScoringWeights, score_messages};
use crate::context::summarizer::{SUMMARY_HEADING, Summarizer};
use crate::context::windowing::{
    PruneReport, WindowingConfig, apply_partition, enforce_message_limit, select_window,
};
use crate::tools::core::truncate_at_char_boundary;

const SUMMARY_TRUNCATED: &str = "\n[summary truncated]";

/// What a compaction pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// Messages folded into the summary.
    pub summarized: usize,
    /// Messages kept verbatim.
    pub kept: usize,
    /// Whether a new summary replaced the old one.
    pub summary_updated: bool,
    /// Hard-ceiling prune, when one happened.
    pub pruned: Option<PruneReport>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CompactionConfig {
    pub windowing: WindowingConfig,
    pub weights: ScoringWeights,
    /// Hard ceiling on history length, enforced before token accounting.
    pub max_history_messages: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            windowing: WindowingConfig::default(),
            weights: ScoringWeights::default(),
            max_history_messages: 200,
        }
    }
}

/// Estimated tokens of the history plus the injected summary.
pub fn estimate_state(state: &ConversationState, budget: &ContextBudget) -> usize {
    let summary_tokens = state
        .summary
        .as_deref()
        .map_or(0, |s| budget.estimate_text(SUMMARY_HEADING) + budget.estimate_text(s));
    budget.estimate_messages(&state.messages) + summary_tokens
}

/// Run one compaction pass. Returns `None` when nothing changed.
pub async fn compact(
    state: &mut ConversationState,
    budget: &ContextBudget,
    summarizer: &Summarizer,
    config: &CompactionConfig,
) -> Option<CompactionReport> {
    let pruned = enforce_message_limit(&mut state.messages, config.max_history_messages);
    if let Some(report) = pruned {
        info!(
            "Pruned {} oldest messages (limit {})",
            report.removed, report.limit
        );
        state.record_prune(&report);
    }

    let tokens_before = estimate_state(state, budget);
    let unchanged = |tokens: usize| {
        pruned.map(|p| CompactionReport {
            tokens_before: tokens,
            tokens_after: tokens,
            kept: state.messages.len(),
            pruned: Some(p),
            ..Default::default()
        })
    };
    if tokens_before <= budget.effective_limit() {
        return unchanged(tokens_before);
    }

    let scores = score_messages(
        &state.messages,
        &config.weights,
        ScoringContext {
            working_set: Some(&state.working_set),
            ..Default::default()
        },
    );
    let partition = select_window(
        &state.messages,
        &scores,
        Some(&state.working_set),
        &config.windowing,
    );
    if partition.is_noop() {
        warn!(
            "History at ~{tokens_before} tokens exceeds limit {} but every message is retained",
            budget.effective_limit()
        );
        return unchanged(tokens_before);
    }

    let messages = std::mem::take(&mut state.messages);
    let (kept, summarized) = apply_partition(messages, &partition);
    let kept_tokens = budget.estimate_messages(&kept);
    state.messages = kept;
    debug!(
        "Compacting: keeping {} messages, summarizing {}",
        state.messages.len(),
        summarized.len()
    );

    let summary_updated = match summarizer
        .summarize(&summarized, state.summary_body(), Some(&state.working_set))
        .await
    {
        Ok(summary) => {
            let limit = config.max_history_messages;
            let note_tokens = state
                .prune_note(limit)
                .map_or(0, |note| budget.estimate_text(&format!("{note}\n\n")));
            let allowance = tokens_before
                .saturating_sub(kept_tokens)
                .saturating_sub(budget.estimate_text(SUMMARY_HEADING))
                .saturating_sub(note_tokens);
            state.set_summary(fit_summary(summary, allowance, budget), limit);
            true
        }
        Err(e) => {
            warn!("Summarization failed, compacting without a new summary: {e}");
            false
        }
    };

    let tokens_after = estimate_state(state, budget);
    info!(
        "Compaction: ~{tokens_before} -> ~{tokens_after} tokens ({} summarized)",
        summarized.len()
    );
    Some(CompactionReport {
        tokens_before,
        tokens_after,
        summarized: summarized.len(),
        kept: state.messages.len(),
        summary_updated,
        pruned,
    })
}

/// Cut `summary` to fit `allowance` tokens so compaction never grows the
/// history. Returns `None` when nothing fits.
fn fit_summary(summary: String, allowance: usize, budget: &ContextBudget) -> Option<String> {
    let estimated = budget.estimate_text(&summary);
    if estimated <= allowance {
        return Some(summary);
    }
    let marker_tokens = budget.estimate_text(SUMMARY_TRUNCATED);
    if allowance <= marker_tokens {
        warn!("No room for a summary within the compaction allowance");
        return None;
    }
    let mut max_bytes = summary.len() * (allowance - marker_tokens) / estimated.max(1);
    loop {
        let cut = truncate_at_char_boundary(&summary, max_bytes);
        if cut.is_empty() {
            return None;
        }
        if budget.estimate_text(cut) + marker_tokens <= allowance {
            debug!("Summary truncated from {} to {} bytes", summary.len(), cut.len());
            return Some(format!("{cut}{SUMMARY_TRUNCATED}"));
        }
        max_bytes = cut.len().saturating_sub(cut.len() / 10 + 1);
    }
}
