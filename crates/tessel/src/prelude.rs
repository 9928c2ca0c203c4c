//! Convenience re-exports for common `tessel` types.
//!
//! ```ignore
//! use tessel::prelude::*;
//! ```
//!
//! Covers what most hosts need: the [`Agent`] and its config, event
//! handlers, the provider capability, the approval gate, and tools.
//! Scoring, windowing and compression internals stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    AgentError, Message, ProviderError, Role, ToolCall, ToolDef, ToolResult, json_schema_for,
};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AbortHandle, Agent, AgentConfig, AgentEvent, ChatOutcome, CompositeEventHandler,
    EventHandler, FnEventHandler, LoggingHandler, NoopHandler, StopReason, TurnStats,
};

// ── Providers ───────────────────────────────────────────────────────
pub use crate::api::{ChatRequest, OpenAiCompatProvider, Provider, ProviderResponse, StreamSink};

// ── Approvals ───────────────────────────────────────────────────────
pub use crate::approval::{
    ApprovalGate, ApprovalStore, ConfirmationHandler, ConfirmationRequest, ConfirmationResult,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{ContextBudget, ConversationState};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{FnTool, Tool, ToolFuture, ToolRegistry, ToolSet, ToolSpec, parse_tool_args};
