//! Retention scores for historical messages.
//!
//! Each message gets four independent components in `[0, 1]`, combined by
//! weighted average:
//!
//! | Component | Signal |
//! |-----------|--------|
//! | recency | linear decay from the newest message |
//! | references | how many later messages mention a file or entity this one mentions |
//! | user emphasis | imperative or emphatic phrasing in user messages |
//! | action relevance | the message requested or reported a mutation or command |
//!
//! Scoring is a pure function of the history, the weights and the optional
//! context: it never mutates anything and is deterministic.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::working_set::WorkingSet;
use crate::tools::names;
use crate::{ContentBlock, Message, Role};

/// File-path-like tokens: at least one `/`, or a known source extension.
static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:[A-Za-z0-9_.\-~]+/)+[A-Za-z0-9_.\-]+|\b[A-Za-z0-9_\-]+\.(?:rs|py|js|ts|tsx|jsx|go|java|c|h|cpp|hpp|toml|json|yaml|yml|md)\b",
    )
    .expect("path regex is valid")
});

const EMPHASIS_KEYWORDS: &[&str] = &[
    "must",
    "always",
    "never",
    "important",
    "make sure",
    "ensure",
    "don't",
    "do not",
    "remember",
    "critical",
    "required",
];

const IMPERATIVE_VERBS: &[&str] = &[
    "fix", "add", "implement", "remove", "delete", "rename", "refactor", "update", "change",
    "create", "write", "use", "keep", "stop", "run",
];

/// Weights of the score components. Defaults sum to 1.0.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    pub recency: f64,
    pub references: f64,
    pub user_emphasis: f64,
    pub action_relevance: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            recency: 0.4,
            references: 0.2,
            user_emphasis: 0.2,
            action_relevance: 0.2,
        }
    }
}

impl ScoringWeights {
    fn sum(&self) -> f64 {
        self.recency + self.references + self.user_emphasis + self.action_relevance
    }
}

/// Optional inputs that sharpen the reference component.
#[derive(Default, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub working_set: Option<&'a WorkingSet>,
    /// Files known to a code index; mentions of these get a relevance boost.
    pub indexed_files: Option<&'a HashSet<String>>,
    /// Extra entity names to track as references.
    pub entities: Option<&'a [String]>,
}

/// Score of one message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageScore {
    pub index: usize,
    pub recency: f64,
    pub references: f64,
    pub user_emphasis: f64,
    pub action_relevance: f64,
    /// Weighted combination, in `[0, 1]`.
    pub total: f64,
}

/// Score every message in `messages`. Output index `i` scores message `i`.
pub fn score_messages(
    messages: &[Message],
    weights: &ScoringWeights,
    ctx: ScoringContext<'_>,
) -> Vec<MessageScore> {
    let n = messages.len();
    if n == 0 {
        return Vec::new();
    }

    let texts: Vec<String> = messages.iter().map(Message::searchable_text).collect();
    let mentions: Vec<HashSet<String>> = texts.iter().map(|t| mentions_in(t, ctx)).collect();
    let tool_names = tool_names_by_id(messages);
    let weight_sum = weights.sum();

    (0..n)
        .map(|i| {
            let age = (n - 1 - i) as f64;
            let recency = 1.0 - age / n as f64;
            let references = reference_score(i, &mentions, &texts, ctx);
            let user_emphasis = if messages[i].role == Role::User && !messages[i].has_tool_result()
            {
                emphasis_score(&texts[i])
            } else {
                0.0
            };
            let action_relevance = action_score(&messages[i], &tool_names);

            let total = if weight_sum > 0.0 {
                (weights.recency * recency
                    + weights.references * references
                    + weights.user_emphasis * user_emphasis
                    + weights.action_relevance * action_relevance)
                    / weight_sum
            } else {
                0.0
            };

            MessageScore {
                index: i,
                recency,
                references,
                user_emphasis,
                action_relevance,
                total: total.clamp(0.0, 1.0),
            }
        })
        .collect()
}

/// Paths mentioned in `text`.
pub fn extract_file_mentions(text: &str) -> Vec<String> {
    PATH_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn mentions_in(text: &str, ctx: ScoringContext<'_>) -> HashSet<String> {
    let mut out: HashSet<String> = extract_file_mentions(text).into_iter().collect();
    let tracked = ctx
        .working_set
        .into_iter()
        .flat_map(|ws| ws.entities())
        .chain(ctx.entities.into_iter().flatten().map(String::as_str));
    for entity in tracked {
        if text.contains(entity) {
            out.insert(entity.to_string());
        }
    }
    out
}

fn reference_score(
    i: usize,
    mentions: &[HashSet<String>],
    texts: &[String],
    ctx: ScoringContext<'_>,
) -> f64 {
    if mentions[i].is_empty() {
        return 0.0;
    }
    let later = texts[i + 1..]
        .iter()
        .filter(|t| mentions[i].iter().any(|m| t.contains(m.as_str())))
        .count();
    let mut score = (later as f64 / 3.0).min(1.0);
    if let Some(indexed) = ctx.indexed_files
        && mentions[i].iter().any(|m| indexed.contains(m))
    {
        score += 0.2;
    }
    score.min(1.0)
}

fn emphasis_score(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let mut hits = EMPHASIS_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count();
    if text.contains('!') {
        hits += 1;
    }
    let shouting = text
        .split_whitespace()
        .any(|w| w.len() >= 3 && w.chars().all(|c| c.is_ascii_uppercase()));
    if shouting {
        hits += 1;
    }
    let first_word = lower
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_alphanumeric());
    if IMPERATIVE_VERBS.contains(&first_word) {
        hits += 1;
    }
    (hits as f64 / 3.0).min(1.0)
}

fn action_score(message: &Message, tool_names: &HashMap<&str, &str>) -> f64 {
    let mut score: f64 = 0.0;
    for block in message.blocks() {
        let (name, is_result) = match block {
            ContentBlock::ToolUse { name, .. } => (name.as_str(), false),
            ContentBlock::ToolResult { tool_use_id, .. } => {
                match tool_names.get(tool_use_id.as_str()) {
                    Some(name) => (*name, true),
                    None => continue,
                }
            }
            _ => continue,
        };
        let s = if names::is_destructive(name) {
            if is_result { 0.8 } else { 1.0 }
        } else {
            0.3
        };
        score = score.max(s);
    }
    score
}

fn tool_names_by_id(messages: &[Message]) -> HashMap<&str, &str> {
    messages
        .iter()
        .flat_map(|m| m.tool_uses())
        .map(|(id, name, _)| (id, name))
        .collect()
}
