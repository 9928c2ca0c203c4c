//! Conversation summarization for context compaction.
//!
//! The summarizer turns the span of messages that fell out of the window
//! into a single running summary. Each call merges the prior summary, so the
//! history is never re-summarized from scratch. When an [`Embedder`] is
//! available, near-duplicate messages are collapsed before the prompt is
//! built.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::{ChatRequest, Embedder, NullSink, Provider};
use crate::context::working_set::WorkingSet;
use crate::error::ProviderError;
use crate::{ContentBlock, Message};

/// Heading under which the summary is injected into the system prompt.
pub const SUMMARY_HEADING: &str = "\n\n## Previous Conversation Summary\n";

const SUMMARIZATION_PROMPT: &str = "\
Summarize the following conversation messages concisely. Focus on:
- What was accomplished (completed subtasks, files modified)
- Key findings and decisions made
- Failed approaches and why they failed
- File paths and function names mentioned
- What remains to be done

Rules:
- Only include facts stated in the messages.
- Preserve file paths, function names and error messages verbatim.
- If an existing summary is given, merge the new information into it. The result \
  replaces the existing summary entirely.";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Output cap for the summarization request.
    pub max_summary_tokens: u32,
    /// Cosine similarity at or above which two messages count as duplicates.
    pub similarity_threshold: f32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_summary_tokens: 1024,
            similarity_threshold: 0.92,
        }
    }
}

/// One line of the summarization prompt: a representative message and the
/// number of near-duplicates it stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryLine {
    pub text: String,
    pub count: usize,
}

/// Summarizes evicted history through a chat provider.
pub struct Summarizer {
    provider: Arc<dyn Provider>,
    embedder: Option<Arc<dyn Embedder>>,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            embedder: None,
            config: SummarizerConfig::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_config(mut self, config: SummarizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn set_provider(&mut self, provider: Arc<dyn Provider>) {
        self.provider = provider;
    }

    /// Summarize `span`, merging `existing` and the working-set note.
    ///
    /// Returns an error on provider failure or an empty answer; callers
    /// decide how to recover.
    pub async fn summarize(
        &self,
        span: &[Message],
        existing: Option<&str>,
        working_set: Option<&WorkingSet>,
    ) -> Result<String, ProviderError> {
        let lines = self.group(span).await;
        let preservation = working_set
            .filter(|ws| !ws.is_empty())
            .map(WorkingSet::preservation_note);
        let prompt = build_summary_prompt(&lines, existing, preservation.as_deref());

        let request_messages = [Message::user(prompt)];
        let request = ChatRequest::new(&request_messages)
            .with_system_prompt(SUMMARIZATION_PROMPT)
            .with_max_output_tokens(self.config.max_summary_tokens);
        let response = self.provider.stream_chat(request, &mut NullSink).await?;

        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(ProviderError::Malformed("empty summary".into()));
        }
        debug!(
            "Summarized {} messages ({} lines) into {} chars",
            span.len(),
            lines.len(),
            summary.len()
        );
        Ok(summary.to_string())
    }

    async fn group(&self, span: &[Message]) -> Vec<SummaryLine> {
        let rendered: Vec<String> = span.iter().map(render_message).collect();
        let Some(embedder) = &self.embedder else {
            return rendered
                .into_iter()
                .map(|text| SummaryLine { text, count: 1 })
                .collect();
        };
        match embedder.embed(&rendered).await {
            Ok(vectors) if vectors.len() == rendered.len() => {
                group_by_similarity(rendered, &vectors, self.config.similarity_threshold)
            }
            Ok(vectors) => {
                warn!(
                    "Embedder returned {} vectors for {} messages, skipping grouping",
                    vectors.len(),
                    rendered.len()
                );
                rendered
                    .into_iter()
                    .map(|text| SummaryLine { text, count: 1 })
                    .collect()
            }
            Err(e) => {
                warn!("Embedding failed, summarizing without grouping: {e}");
                rendered
                    .into_iter()
                    .map(|text| SummaryLine { text, count: 1 })
                    .collect()
            }
        }
    }
}

/// Render a message as a `[role]: text` line. Tool calls are listed inline.
pub fn render_message(msg: &Message) -> String {
    let mut body = msg.text();
    for block in msg.blocks() {
        if let ContentBlock::ToolUse { name, input, .. } = block {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(&format!("(called {name} with {input})"));
        }
    }
    if body.is_empty() {
        body.push_str("[no content]");
    }
    format!("[{}]: {body}", msg.role)
}

/// Build the user prompt for one summarization request.
pub fn build_summary_prompt(
    lines: &[SummaryLine],
    existing: Option<&str>,
    preservation_note: Option<&str>,
) -> String {
    let mut content = String::new();
    if let Some(existing) = existing.filter(|s| !s.trim().is_empty()) {
        content.push_str("=== EXISTING SUMMARY ===\n");
        content.push_str(existing);
        content.push_str("\n\n");
    }
    if let Some(note) = preservation_note {
        content.push_str("=== KEEP IN MIND ===\n");
        content.push_str(note);
        content.push('\n');
    }
    content.push_str("=== MESSAGES TO SUMMARIZE ===\n");
    for line in lines {
        content.push_str(&line.text);
        if line.count > 1 {
            content.push_str(&format!(" (x{} similar)", line.count));
        }
        content.push_str("\n\n");
    }
    content
}

/// Collapse entries whose embedding is within `threshold` of an earlier
/// representative. Order of first appearance is kept.
pub fn group_by_similarity(
    texts: Vec<String>,
    vectors: &[Vec<f32>],
    threshold: f32,
) -> Vec<SummaryLine> {
    let mut reps: Vec<(usize, SummaryLine)> = Vec::new();
    for (i, text) in texts.into_iter().enumerate() {
        let existing = reps
            .iter_mut()
            .find(|(rep, _)| cosine_similarity(&vectors[*rep], &vectors[i]) >= threshold);
        match existing {
            Some((_, line)) => line.count += 1,
            None => reps.push((i, SummaryLine { text, count: 1 })),
        }
    }
    reps.into_iter().map(|(_, line)| line).collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
