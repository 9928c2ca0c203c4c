//! Keep/summarize partitioning of conversation history.
//!
//! [`select_window`] is a greedy, single-pass selection. Rules, in priority
//! order:
//!
//! 1. the newest `min_recent_messages` are always kept;
//! 2. a `tool_use` message and the `tool_result` message answering it are
//!    never split: if either half is kept, both are;
//! 3. with `preserve_working_set`, messages mentioning a tracked file or
//!    entity are kept regardless of score;
//! 4. remaining messages scoring at least `importance_threshold` are kept,
//!    newest first, until `max_messages` are kept;
//! 5. everything else is summarized.
//!
//! [`enforce_message_limit`] is the hard ceiling applied before any of this:
//! oldest-first removal that drops a tool pair as a unit and leaves the
//! history opening with a user turn.

use serde::{Deserialize, Serialize};

use crate::context::scoring::MessageScore;
use crate::context::working_set::WorkingSet;
use crate::{Content, ContentBlock, Message, Role};

/// Placeholder opening the kept history when it would otherwise start with
/// an assistant turn.
pub const CONTINUATION_NOTE: &str = "[Earlier conversation is summarized in the system prompt.]";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WindowingConfig {
    pub min_recent_messages: usize,
    pub max_messages: usize,
    pub importance_threshold: f64,
    pub preserve_tool_pairs: bool,
    pub preserve_working_set: bool,
}

impl Default for WindowingConfig {
    fn default() -> Self {
        Self {
            min_recent_messages: 6,
            max_messages: 40,
            importance_threshold: 0.5,
            preserve_tool_pairs: true,
            preserve_working_set: true,
        }
    }
}

/// Indices of messages to keep verbatim and to summarize, both ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowPartition {
    pub keep: Vec<usize>,
    pub summarize: Vec<usize>,
}

impl WindowPartition {
    pub fn is_noop(&self) -> bool {
        self.summarize.is_empty()
    }
}

/// Partition `messages` into keep and summarize sets.
pub fn select_window(
    messages: &[Message],
    scores: &[MessageScore],
    working_set: Option<&WorkingSet>,
    config: &WindowingConfig,
) -> WindowPartition {
    let n = messages.len();
    let mut keep = vec![false; n];

    // 1. Recency floor.
    let recent_start = n.saturating_sub(config.min_recent_messages);
    for k in keep.iter_mut().skip(recent_start) {
        *k = true;
    }
    let mut kept = n - recent_start;

    // 3 + 4. Walk older messages newest-first.
    for i in (0..recent_start).rev() {
        let references_working_set = config.preserve_working_set
            && working_set.is_some_and(|ws| ws.is_referenced_by(&messages[i].searchable_text()));
        let score = scores.get(i).map_or(0.0, |s| s.total);
        if references_working_set
            || (score >= config.importance_threshold && kept < config.max_messages)
        {
            keep[i] = true;
            kept += 1;
        }
    }

    // 2. Tool pairs move as a unit.
    if config.preserve_tool_pairs {
        for i in 0..n.saturating_sub(1) {
            if messages[i].has_tool_use()
                && messages[i].is_answered_by(&messages[i + 1])
                && keep[i] != keep[i + 1]
            {
                keep[i] = true;
                keep[i + 1] = true;
            }
        }
    }

    let (keep_idx, summarize_idx): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| keep[i]);
    WindowPartition {
        keep: keep_idx,
        summarize: summarize_idx,
    }
}

/// Split `messages` by `partition`, returning `(kept, summarized)`.
///
/// The kept history is normalized for strict role alternation: adjacent
/// same-role messages are merged, and a leading assistant turn gets a short
/// user placeholder in front of it.
pub fn apply_partition(
    messages: Vec<Message>,
    partition: &WindowPartition,
) -> (Vec<Message>, Vec<Message>) {
    let mut kept = Vec::with_capacity(partition.keep.len());
    let mut summarized = Vec::with_capacity(partition.summarize.len());
    let mut keep_iter = partition.keep.iter().peekable();
    for (i, msg) in messages.into_iter().enumerate() {
        if keep_iter.peek() == Some(&&i) {
            keep_iter.next();
            kept.push(msg);
        } else {
            summarized.push(msg);
        }
    }
    (normalize_alternation(kept), summarized)
}

/// Merge adjacent same-role messages and make sure history opens with a user turn.
pub fn normalize_alternation(messages: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len() + 1);
    for msg in messages {
        match out.last_mut() {
            Some(prev) if prev.role == msg.role => merge_into(prev, msg),
            _ => out.push(msg),
        }
    }
    if out.first().is_some_and(|m| m.role == Role::Assistant) {
        out.insert(0, Message::user(CONTINUATION_NOTE));
    }
    out
}

fn merge_into(prev: &mut Message, next: Message) {
    let mut blocks = into_blocks(std::mem::replace(&mut prev.content, Content::Blocks(Vec::new())));
    blocks.extend(into_blocks(next.content));
    // Tool results lead a user turn.
    if prev.role == Role::User {
        blocks.sort_by_key(|b| !matches!(b, ContentBlock::ToolResult { .. }));
    }
    prev.content = Content::Blocks(blocks);
}

fn into_blocks(content: Content) -> Vec<ContentBlock> {
    match content {
        Content::Text(text) if text.is_empty() => Vec::new(),
        Content::Text(text) => vec![ContentBlock::Text { text }],
        Content::Blocks(blocks) => blocks,
    }
}

// ── Hard ceiling ──────────────────────────────────────────────────

/// Result of a hard-ceiling prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    pub limit: usize,
}

const PRUNE_NOTE_PREFIX: &str = "[Note: ";
const PRUNE_NOTE_SUFFIX: &str = "-message history limit.]";

/// Note leading the conversation summary so pruning is never silent.
pub fn prune_note(removed: usize, limit: usize) -> String {
    format!(
        "{PRUNE_NOTE_PREFIX}{removed} earliest messages were removed to respect the {limit}{PRUNE_NOTE_SUFFIX}"
    )
}

/// `summary` without a leading [`prune_note`].
pub fn strip_prune_note(summary: &str) -> &str {
    summary
        .strip_prefix(PRUNE_NOTE_PREFIX)
        .and_then(|rest| rest.split_once(PRUNE_NOTE_SUFFIX))
        .map_or(summary, |(_, body)| body.trim_start())
}

/// Remove the oldest messages until at most `max_messages` remain.
///
/// A removed `tool_use` message takes its answering `tool_result` message
/// with it, so no pair is ever split across the boundary. The survivors open
/// with a plain user turn: pruning continues to the next one, and when none
/// is left a [`CONTINUATION_NOTE`] placeholder leads instead. The placeholder
/// only pushes the length past `max_messages` when the newest exchange alone
/// fills the ceiling.
pub fn enforce_message_limit(messages: &mut Vec<Message>, max_messages: usize) -> Option<PruneReport> {
    if messages.len() <= max_messages {
        return None;
    }
    let mut drop = 0;
    while messages.len() - drop > max_messages {
        drop = skip_unit(messages, drop);
    }

    if let Some(start) = (drop..messages.len()).find(|&i| is_plain_user(&messages[i])) {
        messages.drain(..start);
        return Some(PruneReport {
            removed: start,
            limit: max_messages,
        });
    }

    while messages.get(drop).is_some_and(Message::has_tool_result) {
        drop += 1;
    }
    // Make room for the placeholder.
    if drop < messages.len() && messages.len() - drop >= max_messages {
        let next = skip_unit(messages, drop);
        if next < messages.len() {
            drop = next;
        }
    }
    messages.drain(..drop);
    if !messages.is_empty() {
        messages.insert(0, Message::user(CONTINUATION_NOTE));
    }
    Some(PruneReport {
        removed: drop,
        limit: max_messages,
    })
}

/// Index just past the message at `at`, or past its answer when it is a
/// `tool_use` message.
fn skip_unit(messages: &[Message], at: usize) -> usize {
    let removed = &messages[at];
    if removed.has_tool_use()
        && let Some(next) = messages.get(at + 1)
        && removed.is_answered_by(next)
    {
        at + 2
    } else {
        at + 1
    }
}

fn is_plain_user(message: &Message) -> bool {
    message.role == Role::User && !message.has_tool_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::working_set::FileAccessType;
    use crate::{ToolCall, ToolResult};
    use serde_json::json;

    fn flat_scores(n: usize, value: f64) -> Vec<MessageScore> {
        (0..n)
            .map(|index| MessageScore {
                index,
                recency: 0.0,
                references: 0.0,
                user_emphasis: 0.0,
                action_relevance: 0.0,
                total: value,
            })
            .collect()
    }

    fn chatter(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    fn tool_pair(id: &str) -> (Message, Message) {
        let call = ToolCall::new(id, "read_file", json!({"path": "a.rs"}));
        (
            Message::assistant_blocks(vec![call.to_block()]),
            Message::tool_results(&[ToolResult::ok(id, "contents")]),
        )
    }

    #[test]
    fn keeps_exactly_recent_when_older_scores_are_low() {
        let messages = chatter(10);
        let mut scores = flat_scores(10, 0.1);
        for s in scores.iter_mut().skip(7) {
            s.total = 0.9;
        }
        let config = WindowingConfig {
            min_recent_messages: 3,
            ..Default::default()
        };
        let partition = select_window(&messages, &scores, None, &config);
        assert_eq!(partition.keep, vec![7, 8, 9]);
        assert_eq!(partition.summarize, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn high_scores_kept_up_to_cap() {
        let messages = chatter(10);
        let scores = flat_scores(10, 0.9);
        let config = WindowingConfig {
            min_recent_messages: 2,
            max_messages: 5,
            ..Default::default()
        };
        let partition = select_window(&messages, &scores, None, &config);
        assert_eq!(partition.keep, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn tool_pair_pulled_back_across_recency_boundary() {
        let mut messages = chatter(4);
        let (use_msg, result_msg) = tool_pair("t1");
        messages.push(use_msg); // 4
        messages.push(result_msg); // 5
        messages.push(Message::assistant("done")); // 6
        let scores = flat_scores(7, 0.0);
        let config = WindowingConfig {
            min_recent_messages: 2,
            ..Default::default()
        };
        let partition = select_window(&messages, &scores, None, &config);
        assert_eq!(partition.keep, vec![4, 5, 6]);
    }

    #[test]
    fn working_set_mentions_survive_low_scores() {
        let mut messages = chatter(6);
        messages[1] = Message::assistant("I changed src/engine.rs");
        let scores = flat_scores(6, 0.0);
        let mut ws = WorkingSet::default();
        ws.touch_file("src/engine.rs", FileAccessType::Write, 1);
        let config = WindowingConfig {
            min_recent_messages: 2,
            ..Default::default()
        };
        let partition = select_window(&messages, &scores, Some(&ws), &config);
        assert_eq!(partition.keep, vec![1, 4, 5]);

        let off = WindowingConfig {
            preserve_working_set: false,
            ..config
        };
        assert_eq!(select_window(&messages, &scores, Some(&ws), &off).keep, vec![4, 5]);
    }

    #[test]
    fn apply_partition_restores_alternation() {
        let messages = chatter(6);
        let partition = WindowPartition {
            keep: vec![1, 3, 4, 5],
            summarize: vec![0, 2],
        };
        let (kept, summarized) = apply_partition(messages, &partition);
        assert_eq!(summarized.len(), 2);
        // assistant 1 + assistant 3 merge; a placeholder user turn leads.
        assert_eq!(kept.len(), 4);
        assert_eq!(kept[0].text(), CONTINUATION_NOTE);
        assert_eq!(kept[1].role, Role::Assistant);
        assert_eq!(kept[1].text(), "answer 1\nanswer 3");
        for pair in kept.windows(2) {
            assert_ne!(pair[0].role, pair[1].role);
        }
    }

    #[test]
    fn limit_is_noop_under_ceiling() {
        let mut messages = chatter(4);
        assert!(enforce_message_limit(&mut messages, 10).is_none());
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn limit_never_splits_tool_pairs() {
        let mut messages = Vec::new();
        for i in 0..6 {
            messages.push(Message::user(format!("turn {i}")));
            let (u, r) = tool_pair(&format!("t{i}"));
            messages.push(u);
            messages.push(r);
            messages.push(Message::assistant("ok"));
        }
        for max in 1..messages.len() {
            let mut pruned = messages.clone();
            let report = enforce_message_limit(&mut pruned, max).unwrap();
            assert!(pruned.len() <= max, "max={max}");
            let placeholder = usize::from(pruned.first().is_some_and(|m| m.text() == CONTINUATION_NOTE));
            assert_eq!(report.removed, messages.len() - pruned.len() + placeholder);
            if let Some(first) = pruned.first() {
                assert_eq!(first.role, Role::User, "max={max}");
                assert!(!first.has_tool_result(), "max={max}");
            }
            for pair in pruned.windows(2) {
                assert_ne!(pair[0].role, pair[1].role, "max={max}");
            }
            for (i, msg) in pruned.iter().enumerate() {
                if msg.has_tool_use() {
                    assert!(pruned.get(i + 1).is_some_and(|n| msg.is_answered_by(n)));
                }
            }
        }
    }

    #[test]
    fn prune_continues_to_a_user_turn() {
        let mut messages = chatter(8);
        let report = enforce_message_limit(&mut messages, 5).unwrap();
        // Cutting three would leave "answer 3" in front.
        assert_eq!(report.removed, 4);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].text(), "question 4");
    }

    #[test]
    fn prune_note_strips_cleanly() {
        let note = prune_note(4, 8);
        assert!(note.contains("4 earliest messages"));
        assert_eq!(strip_prune_note(&format!("{note}\n\nEarlier work.")), "Earlier work.");
        assert_eq!(strip_prune_note(&note), "");
        assert_eq!(strip_prune_note("[Note: unrelated]"), "[Note: unrelated]");
    }

    #[test]
    fn zero_ceiling_empties_history() {
        let mut messages = chatter(3);
        let report = enforce_message_limit(&mut messages, 0).unwrap();
        assert_eq!(report.removed, 3);
        assert!(messages.is_empty());
    }

    #[test]
    fn prune_without_a_user_turn_left_opens_with_placeholder() {
        let (u, r) = tool_pair("t1");
        let mut messages = vec![
            Message::user("start"),
            Message::assistant("thinking"),
            u,
            r,
            Message::assistant("done"),
        ];
        let report = enforce_message_limit(&mut messages, 3).unwrap();
        assert_eq!(report.removed, 4);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), CONTINUATION_NOTE);
        assert_eq!(messages[1].text(), "done");
    }
}
