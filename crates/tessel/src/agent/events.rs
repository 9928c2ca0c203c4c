//! Events, handlers and per-turn statistics for the [`Agent`](super::harness::Agent).
//!
//! The agent reports everything it does through [`AgentEvent`]s, delivered
//! synchronously and in iteration order to one [`EventHandler`].
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Mirror the loop into `tracing` |
//! | [`FnEventHandler`] | Quick closures |
//! | [`CompositeEventHandler`] | Several handlers in order |

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::context::ContextUsage;
use crate::context::compaction::CompactionReport;
use crate::{ToolCall, ToolResult, Usage};

// ── Loop states ───────────────────────────────────────────────────

/// Where one iteration of the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    RequestBuilding,
    AwaitingProvider,
    ResponseParsing,
    ToolConfirmation,
    ToolExecution,
    ResultIntegration,
    Terminal,
}

/// Why a `chat` call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StopReason {
    /// The model answered without requesting tools.
    #[default]
    Completed,
    /// The user aborted during confirmation, or the abort handle fired.
    Aborted,
    TooManyErrors,
    TimeLimit,
    IterationLimit,
}

impl StopReason {
    /// Marker appended to the final text for abnormal stops.
    pub fn marker(self) -> Option<&'static str> {
        match self {
            StopReason::Completed => None,
            StopReason::Aborted => Some("(Operation aborted by user)"),
            StopReason::TooManyErrors => Some("(Stopping due to repeated errors)"),
            StopReason::TimeLimit => Some("(Reached time limit, stopping)"),
            StopReason::IterationLimit => Some("(Reached iteration limit, stopping)"),
        }
    }
}

// ── Events ────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum AgentEvent<'a> {
    IterationStart {
        iteration: u32,
        max_iterations: u32,
        usage: ContextUsage,
    },
    State(LoopState),
    TextDelta(&'a str),
    ReasoningDelta(&'a str),
    TokenUsage(Usage),
    /// Calls were recovered from response text rather than reported natively.
    ToolCallsExtracted { count: usize },
    ToolStart {
        call: &'a ToolCall,
    },
    ToolEnd {
        call: &'a ToolCall,
        result: &'a ToolResult,
        duration: Duration,
    },
    /// The user (or a missing handler) refused the call.
    ToolDenied {
        call: &'a ToolCall,
    },
    Compacted {
        report: &'a CompactionReport,
    },
    Compressed {
        entities: usize,
        saved_bytes: usize,
    },
    CheckpointSaved {
        id: &'a str,
        iteration: u32,
    },
    Finished {
        reason: StopReason,
    },
}

/// Observer of [`AgentEvent`]s. Every method has a no-op default.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &AgentEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// Handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let AgentEvent::TextDelta(text) = event {
///         print!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&AgentEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent<'_>) {
        (self.0)(event);
    }
}

/// Dispatches every event to each inner handler in registration order.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs every event through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::IterationStart {
                iteration,
                max_iterations,
                usage,
            } => {
                info!(
                    "[iteration {iteration}/{max_iterations}] {}",
                    usage.to_log_string()
                );
            }
            AgentEvent::State(state) => trace!("Loop state: {state:?}"),
            AgentEvent::TextDelta(delta) => {
                let preview: String = delta.chars().take(80).collect();
                trace!("Stream text delta: {preview}");
            }
            AgentEvent::ReasoningDelta(delta) => {
                let preview: String = delta.chars().take(80).collect();
                trace!("Stream reasoning delta: {preview}");
            }
            AgentEvent::TokenUsage(usage) => {
                debug!(
                    "Tokens: input={}, output={}",
                    usage.input_tokens, usage.output_tokens
                );
            }
            AgentEvent::ToolCallsExtracted { count } => {
                info!("Recovered {count} tool call(s) from response text");
            }
            AgentEvent::ToolStart { call } => debug!("Executing tool: {}", call.name),
            AgentEvent::ToolEnd {
                call,
                result,
                duration,
            } => {
                debug!(
                    "Tool {} finished in {:.0}ms ({} bytes, error={})",
                    call.name,
                    duration.as_secs_f64() * 1000.0,
                    result.content.len(),
                    result.is_error
                );
            }
            AgentEvent::ToolDenied { call } => info!("Tool call denied: {}", call.name),
            AgentEvent::Compacted { report } => {
                info!(
                    "Compacted context: ~{} -> ~{} tokens ({} summarized, {} kept)",
                    report.tokens_before, report.tokens_after, report.summarized, report.kept
                );
            }
            AgentEvent::Compressed {
                entities,
                saved_bytes,
            } => debug!("Compressed {entities} entities, saved {saved_bytes} bytes"),
            AgentEvent::CheckpointSaved { id, iteration } => {
                debug!("Checkpoint {id} saved at iteration {iteration}");
            }
            AgentEvent::Finished { reason } => match reason {
                StopReason::Completed => info!("Agent finished"),
                StopReason::Aborted => info!("Agent aborted by user"),
                other => warn!("Agent stopped early: {other:?}"),
            },
        }
    }
}

// ── Turn statistics ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub duration: Duration,
    pub is_error: bool,
}

/// What one `chat` call cost and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TurnStats {
    pub iterations: u32,
    pub tool_call_count: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration: Duration,
    pub stop_reason: StopReason,
}

impl TurnStats {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub(crate) fn add_usage(&mut self, usage: Usage) {
        self.input_tokens += u64::from(usage.input_tokens);
        self.output_tokens += u64::from(usage.output_tokens);
    }
}

/// Result of [`Agent::chat`](super::harness::Agent::chat).
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Final response text, followed by the stop marker for abnormal stops.
    pub text: String,
    pub stats: TurnStats,
}

impl ChatOutcome {
    pub fn stop_reason(&self) -> StopReason {
        self.stats.stop_reason
    }
}
