//! Orchestration core for interactive, tool-using coding agents.
//!
//! `tessel` drives the agentic loop of a coding assistant: it sends the
//! conversation to a language-model [`Provider`](api::Provider), interprets
//! tool-call requests, gates them through an
//! [`ApprovalGate`](approval::ApprovalGate), executes approved calls in
//! bounded-concurrency batches, and feeds results back until the model
//! produces a plain answer or a stop condition fires.
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use tessel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AgentError> {
//!     let provider = OpenAiCompatProvider::from_env("gpt-4o-mini")?;
//!     let tools = ToolSet::new().with_common_tools("/path/to/project");
//!
//!     let mut agent = Agent::new(Arc::new(provider), Arc::new(tools), AgentConfig::default())
//!         .with_system_prompt("You are a careful coding assistant.")
//!         .with_event_handler(Arc::new(LoggingHandler));
//!
//!     let outcome = agent.chat("Read src/main.rs and summarize it.").await?;
//!     println!("{}", outcome.text);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **The loop:** [`Agent`](agent::harness::Agent) and
//!   [`AgentConfig`](agent::config::AgentConfig). Terminal conditions are
//!   reported through [`StopReason`](agent::events::StopReason).
//!
//! - **Observing the loop:** implement
//!   [`EventHandler`](agent::events::EventHandler). Use
//!   [`LoggingHandler`](agent::events::LoggingHandler) for tracing output or
//!   [`CompositeEventHandler`](agent::events::CompositeEventHandler) to fan out.
//!
//! - **Keeping history within budget:** [`context::budget`] derives the
//!   per-model budget, [`context::scoring`] and [`context::windowing`] decide
//!   what to keep, [`context::compaction`] ties them to the
//!   [`Summarizer`](context::summarizer::Summarizer), and
//!   [`context::compression`] shrinks outgoing payloads.
//!
//! - **Deciding what needs a human:** [`approval`].
//!
//! - **Running tools:** [`Tool`](tools::core::Tool),
//!   [`ToolSet`](tools::core::ToolSet) and the batch planner in
//!   [`tools::batch`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | Agent loop, configuration, events, text tool-call extraction, checkpoints |
//! | [`api`] | Provider capability, streaming sink, retry, OpenAI-compatible adapter |
//! | [`approval`] | Approval gate, persisted allow-lists, danger heuristics, diff previews |
//! | [`context`] | Budget tiers, importance scoring, windowing, summarization, entity compression |
//! | [`tools`] | Tool trait and registry, batch planner and executor, built-in tools |

pub mod agent;
pub mod api;
pub mod approval;
pub mod context;
pub mod error;
mod persist;
pub mod prelude;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use error::{AgentError, ProviderError};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use tessel::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct GrepArgs {
///     pattern: String,
///     #[serde(default)]
///     path: Option<String>,
/// }
///
/// let schema = json_schema_for::<GrepArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"pattern".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a conversation message. The system prompt travels separately.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One block of structured message content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Image {
        media_type: String,
        data: String,
    },
}

/// Message content: plain text or an ordered list of blocks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A message in the conversation history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Blocks(blocks),
        }
    }

    /// A user message carrying one `tool_result` block per result, in order.
    pub fn tool_results(results: &[ToolResult]) -> Self {
        Self {
            role: Role::User,
            content: Content::Blocks(results.iter().map(ToolResult::to_block).collect()),
        }
    }

    /// Borrow the content as a block slice. Plain text has no blocks.
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            Content::Blocks(blocks) => blocks,
            Content::Text(_) => &[],
        }
    }

    /// Concatenated text of the message (text blocks and tool result bodies).
    pub fn text(&self) -> String {
        match &self.content {
            Content::Text(t) => t.clone(),
            Content::Blocks(blocks) => {
                let mut out = String::new();
                for block in blocks {
                    let piece = match block {
                        ContentBlock::Text { text } => text.as_str(),
                        ContentBlock::ToolResult { content, .. } => content.as_str(),
                        _ => continue,
                    };
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(piece);
                }
                out
            }
        }
    }

    /// Text plus the serialized inputs of any tool calls, for mention matching.
    pub fn searchable_text(&self) -> String {
        let mut out = self.text();
        for (_, name, input) in self.tool_uses() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(name);
            out.push(' ');
            out.push_str(&input.to_string());
        }
        out
    }

    /// Tool calls requested by this message, in order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.blocks().iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }

    /// Ids of the tool results carried by this message.
    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        self.blocks().iter().filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
    }

    pub fn has_tool_use(&self) -> bool {
        self.tool_uses().next().is_some()
    }

    pub fn has_tool_result(&self) -> bool {
        self.tool_result_ids().next().is_some()
    }

    /// Whether `next` answers every tool call in `self`.
    pub fn is_answered_by(&self, next: &Message) -> bool {
        let ids: Vec<&str> = next.tool_result_ids().collect();
        self.tool_uses().all(|(id, _, _)| ids.contains(&id))
    }

    /// Serialized length of the message, used by size heuristics.
    pub fn char_len(&self) -> usize {
        match &self.content {
            Content::Text(t) => t.len(),
            Content::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.len(),
                    ContentBlock::Thinking { thinking } => thinking.len(),
                    ContentBlock::ToolUse { name, input, .. } => {
                        name.len() + input.to_string().len()
                    }
                    ContentBlock::ToolResult { content, .. } => content.len(),
                    ContentBlock::Image { data, .. } => data.len(),
                })
                .sum(),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition advertised to the model (function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Names listed under the schema's `required` key.
    pub fn required_fields(&self) -> Vec<&str> {
        self.function
            .parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// How a tool call came into existence.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallOrigin {
    /// Reported by the provider's native tool-calling channel.
    #[default]
    Native,
    /// Recovered from response text by the extraction fallback.
    Extracted,
}

/// A tool invocation requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub origin: ToolCallOrigin,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            origin: ToolCallOrigin::Native,
        }
    }

    pub fn extracted(mut self) -> Self {
        self.origin = ToolCallOrigin::Extracted;
        self
    }

    /// String field of the input object, if present.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(|v| v.as_str())
    }

    pub fn to_block(&self) -> ContentBlock {
        ContentBlock::ToolUse {
            id: self.id.clone(),
            name: self.name.clone(),
            input: self.input.clone(),
        }
    }
}

/// Outcome of one tool call, as fed back to the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }

    pub fn to_block(&self) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: self.tool_use_id.clone(),
            content: self.content.clone(),
            is_error: self.is_error,
        }
    }
}

/// Token usage reported by a provider for one request.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
