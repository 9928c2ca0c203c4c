//! Streaming adapter for OpenAI-compatible chat-completions endpoints
//! (OpenRouter, OpenAI, Ollama, vLLM and friends).
//!
//! Responses are read as Server-Sent Events. Text and reasoning deltas are
//! forwarded to the [`StreamSink`] as they arrive; tool-call fragments are
//! accumulated by index and assembled once the stream ends.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use super::retry::{RetryConfig, retry_async};
use super::{ChatRequest, FinishReason, Provider, ProviderFuture, ProviderResponse, StreamSink};
use crate::error::ProviderError;
use crate::{Content, ContentBlock, Message, Role, ToolCall, Usage};

/// Default endpoint root.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "TESSEL_API_KEY";

/// Environment variable overriding the endpoint root.
pub const BASE_URL_ENV: &str = "TESSEL_BASE_URL";

/// Context window assumed when the caller does not declare one.
pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Provider for any endpoint that speaks the chat-completions dialect.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    context_window: usize,
    retry: RetryConfig,
}

impl OpenAiCompatProvider {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tessel/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            retry: RetryConfig::default(),
        })
    }

    /// Build from `TESSEL_API_KEY` and optionally `TESSEL_BASE_URL`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| ProviderError::MissingCredentials(format!("{API_KEY_ENV} is not set")))?;
        let base_url = std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        Self::new(api_key, base_url, model)
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn run(
        &self,
        request: ChatRequest<'_>,
        sink: &mut (dyn StreamSink + Send),
    ) -> Result<ProviderResponse, ProviderError> {
        let body = build_request_body(&self.model, &request);
        debug!(
            "Chat request: model={}, messages={}, tools={}",
            self.model,
            request.messages.len(),
            request.tools.map_or(0, |t| t.len()),
        );
        trace!("Request payload: {body}");

        let url = self.endpoint();
        let mut resp = retry_async(&self.retry, || async {
            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;
            let status = resp.status();
            if status.is_success() {
                Ok(resp)
            } else {
                let text = resp.text().await.unwrap_or_default();
                Err(ProviderError::Http {
                    status: status.as_u16(),
                    body: text,
                })
            }
        })
        .await?;

        // Read the stream chunk by chunk so long tool-call payloads never hit
        // a whole-body timeout.
        let mut state = StreamState::default();
        let mut buffer = String::new();
        while let Some(chunk) = resp.chunk().await? {
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline_pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline_pos).collect();
                state.feed_line(line.trim(), sink);
            }
            if state.done {
                break;
            }
        }
        let remaining = buffer.trim();
        if !remaining.is_empty() {
            state.feed_line(remaining, sink);
        }

        let response = state.finish();
        debug!(
            "Chat response: {} chars, {} tool call(s)",
            response.content.len(),
            response.tool_calls.len()
        );
        Ok(response)
    }
}

impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn stream_chat<'a>(
        &'a self,
        request: ChatRequest<'a>,
        sink: &'a mut (dyn StreamSink + Send),
    ) -> ProviderFuture<'a> {
        Box::pin(self.run(request, sink))
    }
}

// ── Request encoding ──────────────────────────────────────────────

/// Encode a request in the chat-completions wire format.
pub fn build_request_body(model: &str, request: &ChatRequest<'_>) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }
    for message in request.messages {
        encode_message(message, &mut messages);
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": true,
        "stream_options": {"include_usage": true},
    });
    if let Some(tools) = request.tools
        && !tools.is_empty()
    {
        body["tools"] = json!(tools);
    }
    if let Some(max) = request.max_output_tokens {
        body["max_tokens"] = json!(max);
    }
    body
}

fn encode_message(message: &Message, out: &mut Vec<Value>) {
    let blocks = match &message.content {
        Content::Text(text) => {
            out.push(json!({"role": message.role.to_string(), "content": text}));
            return;
        }
        Content::Blocks(blocks) => blocks,
    };

    match message.role {
        Role::Assistant => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text: t } => text.push_str(t),
                    ContentBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": {"name": name, "arguments": input.to_string()},
                    })),
                    _ => {}
                }
            }
            let mut msg = json!({"role": "assistant", "content": text});
            if !tool_calls.is_empty() {
                msg["tool_calls"] = Value::Array(tool_calls);
            }
            out.push(msg);
        }
        Role::User => {
            // Tool results become `tool` messages; everything else stays in one user message.
            let mut parts = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        let content = if *is_error {
                            format!("Error: {content}")
                        } else {
                            content.clone()
                        };
                        out.push(
                            json!({"role": "tool", "tool_call_id": tool_use_id, "content": content}),
                        );
                    }
                    ContentBlock::Text { text } => parts.push(json!({"type": "text", "text": text})),
                    ContentBlock::Image { media_type, data } => parts.push(json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:{media_type};base64,{data}")},
                    })),
                    _ => {}
                }
            }
            if !parts.is_empty() {
                out.push(json!({"role": "user", "content": parts}));
            }
        }
    }
}

// ── Stream decoding ───────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
    #[serde(alias = "reasoning_content")]
    reasoning: Option<String>,
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
struct StreamToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize, Debug)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Accumulates one streamed response.
#[derive(Default)]
pub(crate) struct StreamState {
    text: String,
    reasoning: String,
    calls: BTreeMap<usize, PartialToolCall>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    done: bool,
}

impl StreamState {
    /// Process one SSE line, forwarding deltas to `sink`.
    pub(crate) fn feed_line(&mut self, line: &str, sink: &mut (dyn StreamSink + Send)) {
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        if line == "data: [DONE]" {
            self.done = true;
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let chunk: StreamChunk = match serde_json::from_str(data.trim_start()) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to parse SSE chunk: {e}");
                return;
            }
        };

        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                input_tokens: usage.prompt_tokens.unwrap_or(0),
                output_tokens: usage.completion_tokens.unwrap_or(0),
            });
        }
        for choice in chunk.choices.unwrap_or_default() {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content
                    && !content.is_empty()
                {
                    sink.on_text(&content);
                    self.text.push_str(&content);
                }
                if let Some(reasoning) = delta.reasoning
                    && !reasoning.is_empty()
                {
                    sink.on_reasoning(&reasoning);
                    self.reasoning.push_str(&reasoning);
                }
                for tc in delta.tool_calls.unwrap_or_default() {
                    let entry = self.calls.entry(tc.index.unwrap_or(0)).or_default();
                    if let Some(id) = tc.id {
                        entry.id = Some(id);
                    }
                    if let Some(func) = tc.function {
                        if let Some(name) = func.name {
                            entry.name = Some(name);
                        }
                        if let Some(args) = func.arguments {
                            entry.arguments.push_str(&args);
                        }
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                trace!("Stream finish_reason: {reason}");
                self.finish_reason = Some(reason);
            }
        }
    }

    pub(crate) fn finish(self) -> ProviderResponse {
        let tool_calls: Vec<ToolCall> = self
            .calls
            .into_values()
            .filter_map(|partial| {
                let id = partial.id?;
                let name = partial.name?;
                Some(ToolCall::new(id, name, parse_arguments(&partial.arguments)))
            })
            .collect();

        let finish_reason = match self.finish_reason.as_deref() {
            Some(raw) => FinishReason::parse(raw),
            None if !tool_calls.is_empty() => FinishReason::ToolUse,
            None => FinishReason::EndTurn,
        };

        ProviderResponse {
            content: self.text,
            tool_calls,
            finish_reason,
            usage: self.usage,
            reasoning_content: (!self.reasoning.is_empty()).then_some(self.reasoning),
        }
    }
}

/// Decode streamed argument JSON. Unparseable text is kept as a string so
/// schema validation reports it through the tool-result channel.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
