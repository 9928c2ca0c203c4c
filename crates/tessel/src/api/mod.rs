//! Language-model backend capability.
//!
//! The orchestrator talks to a backend only through the [`Provider`] trait:
//! a single streaming chat call that reports incremental text and reasoning
//! through a [`StreamSink`] and resolves to a complete [`ProviderResponse`].
//! The wire protocol is the adapter's business; [`openai`] ships one adapter
//! for OpenAI-compatible chat-completions endpoints.
//!
//! - [`retry`]: bounded exponential backoff for transient failures.
//! - [`openai`]: SSE streaming adapter built on `reqwest`.

pub mod openai;
pub mod retry;

use std::future::Future;
use std::pin::Pin;

use crate::error::ProviderError;
use crate::{Message, ToolCall, ToolDef, Usage};

pub use openai::OpenAiCompatProvider;
pub use retry::RetryConfig;

/// Everything needed for one chat request.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
    /// Tool schemas to advertise; `None` disables native tool calling.
    pub tools: Option<&'a [ToolDef]>,
    pub system_prompt: Option<&'a str>,
    pub max_output_tokens: Option<u32>,
}

impl<'a> ChatRequest<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        Self {
            messages,
            tools: None,
            system_prompt: None,
            max_output_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: &'a [ToolDef]) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_system_prompt(mut self, prompt: &'a str) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }
}

/// Why the backend stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" => FinishReason::EndTurn,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolUse,
            "length" | "max_tokens" => FinishReason::MaxTokens,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Complete result of a streamed chat call.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
    pub reasoning_content: Option<String>,
}

impl ProviderResponse {
    /// A text-only response, mostly useful for tests and simple adapters.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::EndTurn,
            usage: None,
            reasoning_content: None,
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        if !calls.is_empty() {
            self.finish_reason = FinishReason::ToolUse;
        }
        self.tool_calls = calls;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Receives incremental output while a response is streaming.
pub trait StreamSink {
    fn on_text(&mut self, chunk: &str);
    fn on_reasoning(&mut self, _chunk: &str) {}
}

/// A sink that drops everything.
pub struct NullSink;

impl StreamSink for NullSink {
    fn on_text(&mut self, _chunk: &str) {}
}

/// Boxed future returned by [`Provider::stream_chat`].
pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send + 'a>>;

/// A chat-capable language-model backend.
pub trait Provider: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Declared context window of the active model, in tokens.
    fn context_window(&self) -> usize;

    /// Whether the backend reports tool calls natively.
    fn supports_tools(&self) -> bool {
        true
    }

    fn stream_chat<'a>(
        &'a self,
        request: ChatRequest<'a>,
        sink: &'a mut (dyn StreamSink + Send),
    ) -> ProviderFuture<'a>;
}

/// Boxed future returned by [`Embedder::embed`].
pub type EmbedFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>, ProviderError>> + Send + 'a>>;

/// Optional text-embedding capability used to de-duplicate history before
/// summarization.
pub trait Embedder: Send + Sync {
    fn embed<'a>(&'a self, texts: &'a [String]) -> EmbedFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_parses_both_dialects() {
        assert_eq!(FinishReason::parse("stop"), FinishReason::EndTurn);
        assert_eq!(FinishReason::parse("end_turn"), FinishReason::EndTurn);
        assert_eq!(FinishReason::parse("tool_calls"), FinishReason::ToolUse);
        assert_eq!(FinishReason::parse("length"), FinishReason::MaxTokens);
        assert_eq!(
            FinishReason::parse("content_filter"),
            FinishReason::Other("content_filter".into())
        );
    }

    #[test]
    fn response_with_calls_switches_finish_reason() {
        let resp = ProviderResponse::text("").with_tool_calls(vec![ToolCall::new(
            "a",
            "read_file",
            serde_json::json!({}),
        )]);
        assert_eq!(resp.finish_reason, FinishReason::ToolUse);
    }
}
