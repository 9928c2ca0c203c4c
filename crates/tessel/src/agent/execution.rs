//! Per-iteration tool handling: confirmation, batched execution and sizing.
//!
//! Called by [`Agent::chat`](super::harness::Agent::chat) once the model has
//! asked for tools. Every requested call gets exactly one result, in request
//! order, whether it ran, was denied, or was skipped after an abort.

use tracing::debug;

use super::events::{AgentEvent, EventHandler, LoopState, ToolCallRecord};
use super::harness::AbortHandle;
use crate::approval::{ApprovalGate, Verdict};
use crate::context::ContextConfig;
use crate::context::budget::TokenEstimator;
use crate::tools::batch::{self, BatchObserver, CallOutcome};
use crate::tools::core::{ToolRegistry, truncate_at_char_boundary};
use crate::{ToolCall, ToolResult};

pub const DENIED_MESSAGE: &str = "User denied this operation. Please try a different approach.";
pub const ABORTED_MESSAGE: &str = "User aborted the operation.";
pub const SKIPPED_MESSAGE: &str = "Skipped: the operation was aborted before this call ran.";

/// Everything one iteration's tool calls produced.
#[derive(Debug, Default)]
pub(crate) struct IterationResults {
    /// One per requested call, in request order.
    pub results: Vec<ToolResult>,
    /// Calls that actually ran.
    pub records: Vec<ToolCallRecord>,
    /// Indexes of the calls that ran.
    pub executed: Vec<usize>,
    pub had_error: bool,
    pub aborted: bool,
}

struct EventBridge<'a>(&'a dyn EventHandler);

impl BatchObserver for EventBridge<'_> {
    fn on_start(&self, call: &ToolCall) {
        self.0.on_event(&AgentEvent::ToolStart { call });
    }

    fn on_end(&self, call: &ToolCall, outcome: &CallOutcome) {
        self.0.on_event(&AgentEvent::ToolEnd {
            call,
            result: &outcome.result,
            duration: outcome.duration,
        });
    }
}

pub(crate) struct ExecutionContext<'a> {
    pub gate: &'a ApprovalGate,
    pub registry: &'a dyn ToolRegistry,
    pub events: &'a dyn EventHandler,
    pub abort: &'a AbortHandle,
    pub max_concurrency: usize,
    pub budget: &'a ContextConfig,
    pub estimator: &'a dyn TokenEstimator,
}

/// Confirm every call, run the approved ones, and size the results.
///
/// Calls are normalized in place by the gate, so the caller's copies match
/// what was executed.
pub(crate) async fn run_tool_calls(
    ctx: &ExecutionContext<'_>,
    calls: &mut [ToolCall],
) -> IterationResults {
    let mut out = IterationResults::default();
    let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
    let mut approved: Vec<usize> = Vec::new();

    ctx.events
        .on_event(&AgentEvent::State(LoopState::ToolConfirmation));
    for index in 0..calls.len() {
        if out.aborted || ctx.abort.is_aborted() {
            out.aborted = true;
            break;
        }
        let call = &mut calls[index];
        match ctx.gate.review(call).await {
            Verdict::Approved => approved.push(index),
            Verdict::Denied => {
                ctx.events.on_event(&AgentEvent::ToolDenied { call });
                slots[index] = Some(ToolResult::error(&call.id, DENIED_MESSAGE));
                out.had_error = true;
            }
            Verdict::Aborted => {
                slots[index] = Some(ToolResult::error(&call.id, ABORTED_MESSAGE));
                out.aborted = true;
            }
        }
    }

    if out.aborted {
        debug!("Aborted during confirmation; skipping remaining calls");
    } else if !approved.is_empty() {
        ctx.events
            .on_event(&AgentEvent::State(LoopState::ToolExecution));
        let to_run: Vec<ToolCall> = approved.iter().map(|&i| calls[i].clone()).collect();
        let batches = batch::plan_batches(&to_run, ctx.registry);
        let outcomes = batch::execute_batches(
            ctx.registry,
            &to_run,
            &batches,
            ctx.max_concurrency,
            &EventBridge(ctx.events),
        )
        .await;

        for (&index, (call, outcome)) in approved.iter().zip(to_run.iter().zip(outcomes)) {
            out.had_error |= outcome.result.is_error;
            out.records.push(ToolCallRecord {
                name: call.name.clone(),
                duration: outcome.duration,
                is_error: outcome.result.is_error,
            });
            slots[index] = Some(outcome.result);
        }
        out.executed = approved;
    }

    out.results = slots
        .into_iter()
        .zip(calls.iter())
        .map(|(slot, call)| slot.unwrap_or_else(|| ToolResult::error(&call.id, SKIPPED_MESSAGE)))
        .collect();
    size_results(&mut out.results, ctx.budget, ctx.estimator);
    out
}

// ── Result sizing ─────────────────────────────────────────────────

/// Keep one iteration's results inside the budget.
///
/// A single result above `max_immediate_tool_result` tokens is cut to
/// `tool_result_truncate_threshold`. Once the running total passes
/// `tool_results_token_budget`, later results are cut to the threshold too,
/// so earlier results survive intact.
pub fn size_results(results: &mut [ToolResult], budget: &ContextConfig, estimator: &dyn TokenEstimator) {
    let threshold = budget.tool_result_truncate_threshold;
    let mut running = 0usize;
    for result in results.iter_mut() {
        let tokens = estimator.estimate_text(&result.content);
        let over_single = tokens > budget.max_immediate_tool_result;
        let over_total = running + tokens > budget.tool_results_token_budget;
        if (over_single || over_total) && tokens > threshold {
            result.content = truncate_to_tokens(&result.content, tokens, threshold);
            running += threshold;
        } else {
            running += tokens;
        }
    }
}

fn truncate_to_tokens(content: &str, tokens: usize, keep_tokens: usize) -> String {
    let keep_bytes = content.len().saturating_mul(keep_tokens) / tokens.max(1);
    format!(
        "{}\n\n[Result truncated: showing ~{keep_tokens} of ~{tokens} tokens]",
        truncate_at_char_boundary(content, keep_bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ConfirmationResult;
    use crate::context::budget::{CharRatioEstimator, compute_context_config};
    use crate::testing::{RecordingHandler, ScriptedConfirmer};
    use crate::tools::core::{FnTool, ToolSet};
    use crate::ToolDef;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn small_budget() -> ContextConfig {
        compute_context_config(16_000, "", &[], &CharRatioEstimator::new(1.0))
    }

    #[test]
    fn oversized_single_result_is_cut() {
        let budget = small_budget();
        let mut results = vec![ToolResult::ok("a", "x".repeat(budget.max_immediate_tool_result + 1))];
        size_results(&mut results, &budget, &CharRatioEstimator::new(1.0));
        assert!(results[0].content.contains("[Result truncated"));
        assert!(results[0].content.len() < budget.tool_result_truncate_threshold + 100);
    }

    #[test]
    fn later_results_are_cut_when_the_total_overflows() {
        let budget = small_budget();
        let est = CharRatioEstimator::new(1.0);
        // Each result fits alone; together they exceed the iteration budget.
        let each = budget.max_immediate_tool_result - 1;
        let mut results: Vec<ToolResult> = (0..3)
            .map(|i| ToolResult::ok(format!("c{i}"), "y".repeat(each)))
            .collect();
        size_results(&mut results, &budget, &est);
        assert_eq!(results[0].content.len(), each);
        assert!(results[2].content.contains("[Result truncated"));
    }

    fn registry() -> ToolSet {
        let echo = FnTool::new(
            ToolDef::new("bash", "Echo the command", json!({"type": "object"})),
            |args: Value| async move {
                match args["command"].as_str() {
                    Some("fail") => Err("Error: failed".to_string()),
                    Some(cmd) => Ok(cmd.to_string()),
                    None => Ok(String::new()),
                }
            },
        );
        ToolSet::new().with(echo)
    }

    fn bash(id: &str, cmd: &str) -> ToolCall {
        ToolCall::new(id, "bash", json!({"command": cmd}))
    }

    async fn run(
        confirmer: Arc<ScriptedConfirmer>,
        calls: &mut [ToolCall],
        events: &RecordingHandler,
    ) -> IterationResults {
        let gate = ApprovalGate::new().with_handler(confirmer);
        let registry = registry();
        let abort = AbortHandle::default();
        let budget = small_budget();
        let est = CharRatioEstimator::default();
        let ctx = ExecutionContext {
            gate: &gate,
            registry: &registry,
            events,
            abort: &abort,
            max_concurrency: 4,
            budget: &budget,
            estimator: &est,
        };
        run_tool_calls(&ctx, calls).await
    }

    #[tokio::test]
    async fn denied_calls_get_error_results_in_order() {
        let confirmer = Arc::new(ScriptedConfirmer::new(vec![
            ConfirmationResult::Approve,
            ConfirmationResult::Deny,
            ConfirmationResult::Approve,
        ]));
        let events = RecordingHandler::default();
        let mut calls = vec![bash("1", "echo a"), bash("2", "echo b"), bash("3", "echo c")];
        let out = run(confirmer, &mut calls, &events).await;

        let ids: Vec<&str> = out.results.iter().map(|r| r.tool_use_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(out.results[0].content, "echo a");
        assert_eq!(out.results[1].content, DENIED_MESSAGE);
        assert!(out.results[1].is_error);
        assert!(out.had_error);
        assert!(!out.aborted);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.executed, vec![0, 2]);
        assert_eq!(events.count("tool_denied:bash"), 1);
        assert_eq!(events.count("tool_end:bash:ok"), 2);
    }

    #[tokio::test]
    async fn abort_skips_everything_after_it() {
        let confirmer = Arc::new(ScriptedConfirmer::new(vec![
            ConfirmationResult::Approve,
            ConfirmationResult::Abort,
        ]));
        let events = RecordingHandler::default();
        let mut calls = vec![bash("1", "echo a"), bash("2", "echo b"), bash("3", "echo c")];
        let out = run(confirmer.clone(), &mut calls, &events).await;

        assert!(out.aborted);
        assert_eq!(out.results.len(), 3);
        assert_eq!(out.results[0].content, SKIPPED_MESSAGE);
        assert_eq!(out.results[1].content, ABORTED_MESSAGE);
        assert_eq!(out.results[2].content, SKIPPED_MESSAGE);
        assert!(out.records.is_empty());
        assert!(out.executed.is_empty());
        assert_eq!(confirmer.seen().len(), 2);
        assert_eq!(events.count("tool_start"), 0);
    }

    #[tokio::test]
    async fn failing_tools_set_the_error_flag() {
        let confirmer = Arc::new(ScriptedConfirmer::new(vec![]));
        let events = RecordingHandler::default();
        let mut calls = vec![bash("1", "fail")];
        let out = run(confirmer, &mut calls, &events).await;
        assert!(out.had_error);
        assert!(out.results[0].is_error);
        assert_eq!(out.records.len(), 1);
        assert!(out.records[0].is_error);
    }
}
