//! Tools the model can call, and how they are run.
//!
//! - [`core`]: the [`Tool`] and [`ToolRegistry`] traits, the [`ToolSet`]
//!   registry and [`FnTool`] for closure-backed tools.
//! - [`common`]: built-in file and shell tools, registered together with
//!   [`ToolSet::with_common_tools()`].
//! - [`spec`]: [`ToolSpec`](spec::ToolSpec) for structured descriptions.
//! - [`batch`]: the batch planner and the bounded-concurrency executor.
//! - [`names`]: tool name constants and risk classes.

pub mod batch;
pub mod common;
pub mod core;
pub mod names;
pub mod spec;

pub use batch::{Batch, BatchMode, BatchObserver, CallOutcome, execute_batches, plan_batches};
pub use core::{
    DEFAULT_MAX_RESULT_BYTES, FnTool, RegistryFuture, Tool, ToolFuture, ToolRegistry, ToolSet,
    parse_tool_args, truncate_result, validate_tool_input,
};
pub use spec::ToolSpec;
