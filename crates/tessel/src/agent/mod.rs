//! Agent runtime: the [`Agent`] loop and its supporting modules.
//!
//! - [`harness::Agent`]: the tool-use loop. Start here.
//! - [`config::AgentConfig`]: iteration, error and time budgets plus the
//!   context, approval and checkpoint settings.
//! - [`events`]: [`EventHandler`], [`AgentEvent`] and per-turn statistics.
//! - [`extraction`]: recovering tool calls from plain response text.
//! - [`checkpoint`]: versioned snapshots of the conversation with branches.

pub mod checkpoint;
pub mod config;
pub mod events;
pub(crate) mod execution;
pub mod extraction;
pub mod harness;

pub use checkpoint::{CheckpointConfig, CheckpointRecord, CheckpointStore, CheckpointSummary};
pub use config::AgentConfig;
pub use events::{
    AgentEvent, ChatOutcome, CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler,
    LoopState, NoopHandler, StopReason, ToolCallRecord, TurnStats,
};
pub use execution::{ABORTED_MESSAGE, DENIED_MESSAGE, SKIPPED_MESSAGE, size_results};
pub use extraction::extract_tool_calls;
pub use harness::{AbortHandle, Agent};
