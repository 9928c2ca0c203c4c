//! Grouping tool calls into batches and running them.
//!
//! [`plan_batches`] walks the calls in the order the model asked for them.
//! Read-only calls on distinct resources share a parallel batch; a mutating
//! call, or a read of a resource already in the current batch, starts a new
//! one. [`execute_batches`] runs parallel batches under a semaphore and serial
//! batches one call at a time, returning results in request order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::debug;

use crate::tools::core::ToolRegistry;
use crate::tools::names;
use crate::{ToolCall, ToolResult};

/// Default ceiling on simultaneously running calls in a parallel batch.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Parallel,
    Serial,
}

/// A group of calls, by index into the planned slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub mode: BatchMode,
    pub calls: Vec<usize>,
}

/// One executed call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub result: ToolResult,
    pub duration: Duration,
}

/// Start/end notifications, possibly from several calls at once.
pub trait BatchObserver: Sync {
    fn on_start(&self, call: &ToolCall) {
        let _ = call;
    }

    fn on_end(&self, call: &ToolCall, outcome: &CallOutcome) {
        let _ = (call, outcome);
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;
impl BatchObserver for NoopObserver {}

/// The resource a call touches, for conflict detection.
fn resource_of(call: &ToolCall) -> Option<String> {
    names::input_path(&call.input).map(|p| p.trim_start_matches("./").to_string())
}

pub fn plan_batches(calls: &[ToolCall], registry: &dyn ToolRegistry) -> Vec<Batch> {
    let mut batches: Vec<Batch> = Vec::new();
    let mut in_flight: BTreeSet<String> = BTreeSet::new();

    for (index, call) in calls.iter().enumerate() {
        if !registry.is_read_only(&call.name) {
            match batches.last_mut() {
                Some(batch) if batch.mode == BatchMode::Serial => batch.calls.push(index),
                _ => batches.push(Batch {
                    mode: BatchMode::Serial,
                    calls: vec![index],
                }),
            }
            in_flight.clear();
            continue;
        }

        let resource = resource_of(call);
        let conflicts = resource.as_ref().is_some_and(|r| in_flight.contains(r));
        match batches.last_mut() {
            Some(batch) if batch.mode == BatchMode::Parallel && !conflicts => {
                batch.calls.push(index);
            }
            _ => {
                in_flight.clear();
                batches.push(Batch {
                    mode: BatchMode::Parallel,
                    calls: vec![index],
                });
            }
        }
        if let Some(resource) = resource {
            in_flight.insert(resource);
        }
    }
    batches
}

async fn run_one(
    registry: &dyn ToolRegistry,
    call: &ToolCall,
    observer: &dyn BatchObserver,
) -> CallOutcome {
    observer.on_start(call);
    let start = Instant::now();
    let result = registry.execute(call).await;
    let outcome = CallOutcome {
        result,
        duration: start.elapsed(),
    };
    observer.on_end(call, &outcome);
    outcome
}

/// Run every batch in order. The returned outcomes line up with `calls`.
///
/// Error results never cancel their siblings.
pub async fn execute_batches(
    registry: &dyn ToolRegistry,
    calls: &[ToolCall],
    batches: &[Batch],
    max_concurrency: usize,
    observer: &dyn BatchObserver,
) -> Vec<CallOutcome> {
    let mut slots: Vec<Option<CallOutcome>> = vec![None; calls.len()];
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    for batch in batches {
        debug!(
            "Running {:?} batch of {} call(s)",
            batch.mode,
            batch.calls.len()
        );
        match batch.mode {
            BatchMode::Serial => {
                for &index in &batch.calls {
                    let Some(call) = calls.get(index) else { continue };
                    slots[index] = Some(run_one(registry, call, observer).await);
                }
            }
            BatchMode::Parallel => {
                let futures = batch.calls.iter().filter_map(|&index| {
                    let call = calls.get(index)?;
                    let semaphore = Arc::clone(&semaphore);
                    Some(async move {
                        // The semaphore is never closed.
                        let _permit = semaphore.acquire_owned().await.ok();
                        (index, run_one(registry, call, observer).await)
                    })
                });
                for (index, outcome) in futures::future::join_all(futures).await {
                    slots[index] = Some(outcome);
                }
            }
        }
    }

    slots
        .into_iter()
        .zip(calls)
        .map(|(slot, call)| {
            slot.unwrap_or_else(|| CallOutcome {
                result: ToolResult::error(&call.id, "Error: tool call was not scheduled"),
                duration: Duration::ZERO,
            })
        })
        .collect()
}
