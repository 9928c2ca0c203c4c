//! The agent loop.
//!
//! One [`Agent::chat`] call runs a turn: build the request, stream the
//! response, confirm and execute any tool calls, feed the results back, and
//! repeat until the model answers without tools or a stop condition fires.
//!
//! Stop conditions are checked at the top of every iteration, in this order:
//!
//! | Condition | [`StopReason`] |
//! |-----------|----------------|
//! | Abort from confirmation or the [`AbortHandle`] | `Aborted` |
//! | Consecutive failing iterations reach the threshold | `TooManyErrors` |
//! | Wall-clock budget exhausted | `TimeLimit` |
//! | Iteration budget exhausted | `IterationLimit` |
//!
//! A response with no tool calls ends the turn with `Completed`.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::checkpoint::CheckpointStore;
use super::config::AgentConfig;
use super::events::{
    AgentEvent, ChatOutcome, EventHandler, LoopState, NoopHandler, StopReason, TurnStats,
};
use super::execution::{ExecutionContext, run_tool_calls};
use super::extraction::extract_tool_calls;
use crate::api::{ChatRequest, Provider, ProviderResponse, StreamSink};
use crate::approval::{ApprovalGate, normalize_input};
use crate::context::budget::{CharRatioEstimator, TokenEstimator, compute_context_config};
use crate::context::compaction::{compact, estimate_state};
use crate::context::compression::{DecompressingSink, compress_messages};
use crate::context::summarizer::Summarizer;
use crate::context::{ContextBudget, ConversationState};
use crate::error::AgentError;
use crate::tools::core::ToolRegistry;
use crate::{ContentBlock, Message, ToolDef};

// ── AbortHandle ───────────────────────────────────────────────────

/// Stop signal shared with the host, e.g. a Ctrl-C handler.
///
/// Checked at the top of every iteration and before each confirmation.
/// The flag is cleared when a new turn starts.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Forwards streamed output to the event handler.
struct EventSink<'a>(&'a dyn EventHandler);

impl StreamSink for EventSink<'_> {
    fn on_text(&mut self, chunk: &str) {
        self.0.on_event(&AgentEvent::TextDelta(chunk));
    }

    fn on_reasoning(&mut self, chunk: &str) {
        self.0.on_event(&AgentEvent::ReasoningDelta(chunk));
    }
}

// ── Agent ─────────────────────────────────────────────────────────

/// A conversation with a model, its tools and its history.
///
/// ```ignore
/// let provider = Arc::new(OpenAiCompatProvider::from_env("gpt-4o-mini")?);
/// let tools = Arc::new(ToolSet::new().with_common_tools(workdir));
/// let mut agent = Agent::new(provider, tools, AgentConfig::default())
///     .with_system_prompt("You are a careful coding assistant.")
///     .with_gate(ApprovalGate::new().with_handler(confirmer))
///     .with_event_handler(Arc::new(LoggingHandler));
///
/// let outcome = agent.chat("Fix the failing test").await?;
/// println!("{}", outcome.text);
/// ```
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolRegistry>,
    system_prompt: String,
    config: AgentConfig,
    gate: ApprovalGate,
    events: Arc<dyn EventHandler>,
    estimator: Arc<dyn TokenEstimator>,
    budget: ContextBudget,
    summarizer: Summarizer,
    /// Summaries use a provider of their own instead of following switches.
    dedicated_summarizer: bool,
    state: ConversationState,
    checkpoints: Option<CheckpointStore>,
    abort: AbortHandle,
    /// Iterations across all turns, for working-set recency and checkpoints.
    total_iterations: u32,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<dyn ToolRegistry>, config: AgentConfig) -> Self {
        let estimator: Arc<dyn TokenEstimator> = Arc::new(CharRatioEstimator::default());
        let summarizer =
            Summarizer::new(provider.clone()).with_config(config.summarizer.clone());
        let gate = configure_gate(ApprovalGate::new(), &config);
        let budget = ContextBudget::new(provider.context_window(), "", &[], estimator.clone());
        let mut agent = Self {
            provider,
            tools,
            system_prompt: String::new(),
            config,
            gate,
            events: Arc::new(NoopHandler),
            estimator,
            budget,
            summarizer,
            dedicated_summarizer: false,
            state: ConversationState::default(),
            checkpoints: None,
            abort: AbortHandle::new(),
            total_iterations: 0,
        };
        agent.rebuild_budget();
        agent
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self.rebuild_budget();
        self
    }

    /// Use `gate` for confirmations. The config's auto-approve settings and
    /// danger patterns are applied on top of it.
    pub fn with_gate(mut self, gate: ApprovalGate) -> Self {
        self.gate = configure_gate(gate, &self.config);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = handler;
        self
    }

    /// Summarize with `provider` instead of the chat provider.
    pub fn with_summarizer_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.summarizer.set_provider(provider);
        self.dedicated_summarizer = true;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = summarizer;
        self.dedicated_summarizer = true;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self.rebuild_budget();
        self
    }

    /// Resume from a saved conversation.
    pub fn with_state(mut self, state: ConversationState) -> Self {
        self.state = state;
        self
    }

    pub fn with_checkpoint_store(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = handle;
        self
    }

    fn tool_definitions(&self) -> Vec<ToolDef> {
        if self.config.use_tools {
            self.tools.definitions()
        } else {
            Vec::new()
        }
    }

    fn rebuild_budget(&mut self) {
        let tools = self.tool_definitions();
        self.budget = match self.config.context_window_override {
            Some(window) => {
                let pinned =
                    compute_context_config(window, &self.system_prompt, &tools, &*self.estimator);
                ContextBudget::new(window, &self.system_prompt, &tools, self.estimator.clone())
                    .with_override(pinned)
            }
            None => ContextBudget::new(
                self.provider.context_window(),
                &self.system_prompt,
                &tools,
                self.estimator.clone(),
            ),
        };
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn summary(&self) -> Option<&str> {
        self.state.summary.as_deref()
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn checkpoints(&self) -> Option<&CheckpointStore> {
        self.checkpoints.as_ref()
    }

    // ── Mutation ──────────────────────────────────────────────────

    /// Switch to another provider. The budget is recomputed for its window
    /// unless an override is pinned.
    pub fn set_provider(&mut self, provider: Arc<dyn Provider>) {
        info!(
            "Switching provider to {} ({})",
            provider.name(),
            provider.model()
        );
        if !self.dedicated_summarizer {
            self.summarizer.set_provider(provider.clone());
        }
        self.provider = provider;
        let tools = self.tool_definitions();
        self.budget
            .recompute(self.provider.context_window(), &self.system_prompt, &tools);
    }

    /// Forget messages, summary and working set.
    pub fn clear_history(&mut self) {
        self.state.clear();
        debug!("Conversation history cleared");
    }

    /// Replace the conversation, e.g. with a checkpoint's state.
    pub fn restore_state(&mut self, state: ConversationState) {
        self.state = state;
    }

    /// Rewind to checkpoint `id` and continue from its state.
    pub fn rewind_to(&mut self, id: &str) -> Result<(), AgentError> {
        let store = self.checkpoint_store()?;
        let state = store.rewind(id)?;
        self.state = state;
        Ok(())
    }

    fn checkpoint_store(&mut self) -> Result<&mut CheckpointStore, AgentError> {
        if self.checkpoints.is_none() {
            self.checkpoints = Some(CheckpointStore::open(&self.config.checkpoint.dir)?);
        }
        self.checkpoints
            .as_mut()
            .ok_or_else(|| AgentError::Checkpoint("checkpoint store unavailable".into()))
    }

    fn save_checkpoint(&mut self) {
        if !self.config.checkpoint.enabled {
            return;
        }
        let iteration = self.total_iterations;
        let state = self.state.clone();
        let saved = self
            .checkpoint_store()
            .and_then(|store| store.create(&state, iteration));
        match saved {
            Ok(id) => self.events.on_event(&AgentEvent::CheckpointSaved {
                id: &id,
                iteration,
            }),
            Err(e) => warn!("Failed to save checkpoint: {e}"),
        }
    }

    // ── The loop ──────────────────────────────────────────────────

    /// Run one user turn to completion.
    ///
    /// Provider failures end the turn with an error; tool failures and
    /// denials are fed back to the model and only stop the loop once they
    /// repeat.
    pub async fn chat(&mut self, input: &str) -> Result<ChatOutcome, AgentError> {
        let started = Instant::now();
        self.abort.reset();
        if self.config.checkpoint.enabled {
            self.checkpoint_store()?;
        }
        self.state.messages.push(Message::user(input));

        let mut stats = TurnStats::default();
        let mut consecutive_errors = 0u32;
        let mut final_text = String::new();
        let mut aborted = false;

        let reason = loop {
            if aborted || self.abort.is_aborted() {
                break StopReason::Aborted;
            }
            if consecutive_errors >= self.config.max_consecutive_errors {
                warn!("Stopping after {consecutive_errors} consecutive failing iterations");
                break StopReason::TooManyErrors;
            }
            if started.elapsed() >= self.config.max_chat_duration {
                break StopReason::TimeLimit;
            }
            if stats.iterations >= self.config.max_iterations {
                break StopReason::IterationLimit;
            }
            stats.iterations += 1;
            self.total_iterations += 1;

            self.events
                .on_event(&AgentEvent::State(LoopState::RequestBuilding));
            let compaction = self.config.compaction();
            if let Some(report) =
                compact(&mut self.state, &self.budget, &self.summarizer, &compaction).await
            {
                self.events.on_event(&AgentEvent::Compacted { report: &report });
            }
            let summary_tokens =
                estimate_state(&self.state, &self.budget) - self.budget.estimate_messages(&self.state.messages);
            self.events.on_event(&AgentEvent::IterationStart {
                iteration: stats.iterations,
                max_iterations: self.config.max_iterations,
                usage: self.budget.usage(&self.state.messages, summary_tokens),
            });

            let response = match self.request().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Provider request failed: {e}");
                    self.state
                        .messages
                        .push(Message::assistant(format!("(Provider error: {e})")));
                    return Err(e);
                }
            };

            self.events
                .on_event(&AgentEvent::State(LoopState::ResponseParsing));
            if let Some(usage) = response.usage {
                stats.add_usage(usage);
                self.events.on_event(&AgentEvent::TokenUsage(usage));
            }
            let text = response.content;
            let mut calls = response.tool_calls;
            if calls.is_empty() && self.config.use_tools && self.config.extract_tools_from_text {
                let known: HashSet<String> = self
                    .tools
                    .definitions()
                    .iter()
                    .map(|d| d.name().to_string())
                    .collect();
                calls = extract_tool_calls(&text, &known);
                if !calls.is_empty() {
                    self.events
                        .on_event(&AgentEvent::ToolCallsExtracted { count: calls.len() });
                }
            }

            if calls.is_empty() {
                self.state.messages.push(Message::assistant(text.clone()));
                final_text = text;
                self.save_checkpoint();
                break StopReason::Completed;
            }

            for call in &mut calls {
                normalize_input(call);
            }
            let mut blocks = Vec::with_capacity(calls.len() + 1);
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text: text.clone() });
            }
            blocks.extend(calls.iter().map(|c| c.to_block()));
            self.state.messages.push(Message::assistant_blocks(blocks));
            final_text = text;

            let results = {
                let ctx = ExecutionContext {
                    gate: &self.gate,
                    registry: &*self.tools,
                    events: &*self.events,
                    abort: &self.abort,
                    max_concurrency: self.config.max_tool_concurrency,
                    budget: self.budget.config(),
                    estimator: &*self.estimator,
                };
                run_tool_calls(&ctx, &mut calls).await
            };

            self.events
                .on_event(&AgentEvent::State(LoopState::ResultIntegration));
            self.state.messages.push(Message::tool_results(&results.results));
            for &index in &results.executed {
                self.state
                    .working_set
                    .record_tool_call(&calls[index], self.total_iterations);
            }
            stats.tool_call_count += results.records.len();
            stats.tool_calls.extend(results.records);

            if results.had_error {
                consecutive_errors += 1;
            } else {
                consecutive_errors = 0;
            }
            aborted = results.aborted;
            self.save_checkpoint();
        };

        if let Some(marker) = reason.marker() {
            // The history ends with tool results or the user's input here.
            self.state.messages.push(Message::assistant(marker));
            final_text = if final_text.is_empty() {
                marker.to_string()
            } else {
                format!("{final_text}\n\n{marker}")
            };
        }

        stats.duration = started.elapsed();
        stats.stop_reason = reason;
        self.events
            .on_event(&AgentEvent::State(LoopState::Terminal));
        self.events.on_event(&AgentEvent::Finished { reason });
        Ok(ChatOutcome {
            text: final_text,
            stats,
        })
    }

    /// Send the current history, compressed when enabled and worthwhile.
    async fn request(&self) -> Result<ProviderResponse, AgentError> {
        let tools = self.tool_definitions();
        let base = self.state.system_prompt_with_summary(&self.system_prompt);
        let compressed = if self.config.compression.enabled {
            compress_messages(&self.state.messages, &self.config.compression)
        } else {
            None
        };

        let (messages, map, system) = match &compressed {
            Some(c) => {
                self.events.on_event(&AgentEvent::Compressed {
                    entities: c.map.entities().len(),
                    saved_bytes: c.original_bytes.saturating_sub(c.compressed_bytes),
                });
                (&c.messages[..], Some(&c.map), format!("{}\n\n{base}", c.map.legend()))
            }
            None => (&self.state.messages[..], None, base),
        };

        let mut request = ChatRequest::new(messages);
        if !system.is_empty() {
            request = request.with_system_prompt(&system);
        }
        if !tools.is_empty() {
            request = request.with_tools(&tools);
        }
        if let Some(max) = self.config.max_output_tokens {
            request = request.with_max_output_tokens(max);
        }

        self.events
            .on_event(&AgentEvent::State(LoopState::AwaitingProvider));
        let mut sink = EventSink(&*self.events);
        let Some(map) = map else {
            return Ok(self.provider.stream_chat(request, &mut sink).await?);
        };

        let mut decompressing = DecompressingSink::new(&mut sink, map);
        let result = self.provider.stream_chat(request, &mut decompressing).await;
        decompressing.finish();
        let mut response = result?;
        response.content = map.decompress(&response.content);
        if let Some(reasoning) = &response.reasoning_content {
            response.reasoning_content = Some(map.decompress(reasoning));
        }
        for call in &mut response.tool_calls {
            map.decompress_value(&mut call.input);
        }
        Ok(response)
    }
}

fn configure_gate(gate: ApprovalGate, config: &AgentConfig) -> ApprovalGate {
    let gate = gate
        .with_auto_approve_all(config.auto_approve_all)
        .with_auto_approve_tools(config.auto_approve_tools.iter().cloned());
    if config.dangerous_patterns.is_empty() {
        gate
    } else {
        gate.with_danger_patterns(&config.dangerous_patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Role, ToolCall};
    use crate::approval::{ApprovalStore, ConfirmationResult};
    use crate::error::ProviderError;
    use crate::testing::{RecordingHandler, ScriptedConfirmer, ScriptedProvider};
    use crate::tools::core::{FnTool, ToolSet};
    use serde_json::{Value, json};
    use std::time::Duration;

    fn tools() -> Arc<ToolSet> {
        let bash = FnTool::new(
            ToolDef::new(
                "bash",
                "Run a command",
                json!({"type": "object", "properties": {"command": {"type": "string"}}}),
            ),
            |args: Value| async move {
                match args["command"].as_str() {
                    Some(cmd) if cmd.starts_with("false") => Err(format!("Command failed: {cmd}")),
                    Some(cmd) => Ok(format!("ran {cmd}")),
                    None => Err("missing command".to_string()),
                }
            },
        );
        let read = FnTool::new(
            ToolDef::new("read_file", "Read a file", json!({"type": "object"})),
            |args: Value| async move { Ok(format!("contents of {}", args["path"])) },
        )
        .read_only(true);
        Arc::new(ToolSet::new().with(bash).with(read))
    }

    fn bash_call(id: &str, cmd: &str) -> ToolCall {
        ToolCall::new(id, "bash", json!({"command": cmd}))
    }

    fn tool_response(calls: Vec<ToolCall>) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse::text("").with_tool_calls(calls))
    }

    struct Fixture {
        provider: Arc<ScriptedProvider>,
        events: Arc<RecordingHandler>,
        agent: Agent,
    }

    fn fixture(
        script: Vec<Result<ProviderResponse, ProviderError>>,
        config: AgentConfig,
        answers: Vec<ConfirmationResult>,
    ) -> Fixture {
        let provider = Arc::new(ScriptedProvider::new(script));
        let events = Arc::new(RecordingHandler::default());
        let gate = ApprovalGate::new()
            .with_store(ApprovalStore::in_memory())
            .with_handler(Arc::new(ScriptedConfirmer::new(answers)));
        let agent = Agent::new(provider.clone(), tools(), config)
            .with_system_prompt("You are a test agent.")
            .with_gate(gate)
            .with_event_handler(events.clone());
        Fixture {
            provider,
            events,
            agent,
        }
    }

    fn assert_alternates(messages: &[Message]) {
        for pair in messages.windows(2) {
            assert_ne!(pair[0].role, pair[1].role, "roles must alternate: {messages:#?}");
        }
    }

    #[tokio::test]
    async fn plain_answer_completes_in_one_iteration() {
        let mut f = fixture(
            vec![Ok(ProviderResponse::text("Hello there"))],
            AgentConfig::default(),
            vec![],
        );
        let outcome = f.agent.chat("hi").await.unwrap();
        assert_eq!(outcome.text, "Hello there");
        assert_eq!(outcome.stop_reason(), StopReason::Completed);
        assert_eq!(outcome.stats.iterations, 1);
        assert_eq!(f.agent.messages().len(), 2);
        assert_eq!(f.events.count("delta:"), 2);
        assert_eq!(f.events.count("finished:Completed"), 1);

        let requests = f.provider.requests();
        assert_eq!(requests[0].system_prompt.as_deref(), Some("You are a test agent."));
        assert_eq!(requests[0].tool_names, vec!["bash", "read_file"]);
    }

    #[tokio::test]
    async fn tool_results_follow_the_assistant_message() {
        let mut f = fixture(
            vec![
                tool_response(vec![bash_call("c1", "ls"), bash_call("c2", "pwd")]),
                Ok(ProviderResponse::text("All done")),
            ],
            AgentConfig::default(),
            vec![],
        );
        let outcome = f.agent.chat("list things").await.unwrap();
        assert_eq!(outcome.text, "All done");
        assert_eq!(outcome.stats.tool_call_count, 2);

        let messages = f.agent.messages();
        assert_eq!(messages.len(), 4);
        assert_alternates(messages);
        assert!(messages[1].has_tool_use());
        let ids: Vec<&str> = messages[2].tool_result_ids().collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn repeated_denials_stop_the_loop() {
        let config = AgentConfig::default().with_max_consecutive_errors(3);
        let script = (0..5)
            .map(|i| tool_response(vec![bash_call(&format!("c{i}"), "rm -r build")]))
            .collect();
        let mut f = fixture(script, config, vec![ConfirmationResult::Deny; 5]);
        let outcome = f.agent.chat("clean up").await.unwrap();

        assert_eq!(outcome.stop_reason(), StopReason::TooManyErrors);
        assert_eq!(outcome.stats.iterations, 3);
        assert!(outcome.text.ends_with("(Stopping due to repeated errors)"));
        assert_eq!(f.events.count("tool_denied:bash"), 3);
        assert_alternates(f.agent.messages());
    }

    #[tokio::test]
    async fn a_successful_iteration_resets_the_error_count() {
        let config = AgentConfig::default().with_max_consecutive_errors(2);
        let mut f = fixture(
            vec![
                tool_response(vec![bash_call("a", "false 1")]),
                tool_response(vec![bash_call("b", "echo ok")]),
                tool_response(vec![bash_call("c", "false 2")]),
                Ok(ProviderResponse::text("finished")),
            ],
            config.with_auto_approve_all(true),
            vec![],
        );
        let outcome = f.agent.chat("go").await.unwrap();
        assert_eq!(outcome.stop_reason(), StopReason::Completed);
        assert_eq!(outcome.stats.iterations, 4);
        assert_eq!(
            outcome.stats.tool_calls.iter().filter(|r| r.is_error).count(),
            2
        );
    }

    #[tokio::test]
    async fn abort_during_confirmation_ends_the_turn() {
        let mut f = fixture(
            vec![tool_response(vec![bash_call("c1", "rm -r target"), bash_call("c2", "ls")])],
            AgentConfig::default(),
            vec![ConfirmationResult::Abort],
        );
        let outcome = f.agent.chat("clean").await.unwrap();
        assert_eq!(outcome.stop_reason(), StopReason::Aborted);
        assert_eq!(outcome.text, "(Operation aborted by user)");
        assert_eq!(outcome.stats.tool_call_count, 0);
        assert_eq!(f.provider.requests().len(), 1);

        let messages = f.agent.messages();
        assert_alternates(messages);
        assert_eq!(messages[2].tool_result_ids().count(), 2);
        assert_eq!(f.events.count("tool_start"), 0);
    }

    #[tokio::test]
    async fn abort_handle_stops_before_the_next_iteration() {
        let mut f = fixture(
            vec![tool_response(vec![bash_call("c1", "ls")])],
            AgentConfig::default().with_auto_approve_all(true),
            vec![],
        );
        let handle = f.agent.abort_handle();
        let events = f.events.clone();
        let watcher = Arc::new(crate::agent::events::FnEventHandler::new(move |event| {
            events.on_event(event);
            if matches!(event, AgentEvent::ToolEnd { .. }) {
                handle.abort();
            }
        }));
        f.agent = f.agent.with_event_handler(watcher);

        let outcome = f.agent.chat("go").await.unwrap();
        assert_eq!(outcome.stop_reason(), StopReason::Aborted);
        assert_eq!(outcome.stats.iterations, 1);
        assert_eq!(outcome.stats.tool_call_count, 1);
    }

    #[tokio::test]
    async fn time_limit_is_checked_at_the_iteration_boundary() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![tool_response(vec![bash_call("c1", "ls")])])
                .with_delay(Duration::from_millis(60)),
        );
        let config = AgentConfig::default()
            .with_auto_approve_all(true)
            .with_max_chat_duration(Duration::from_millis(20));
        let mut agent = Agent::new(provider.clone(), tools(), config);
        let outcome = agent.chat("go").await.unwrap();

        assert_eq!(outcome.stop_reason(), StopReason::TimeLimit);
        assert_eq!(outcome.stats.iterations, 1);
        assert!(outcome.text.ends_with("(Reached time limit, stopping)"));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn iteration_limit_appends_marker() {
        let script = (0..3)
            .map(|i| tool_response(vec![bash_call(&format!("c{i}"), "ls")]))
            .collect();
        let mut f = fixture(
            script,
            AgentConfig::default()
                .with_max_iterations(2)
                .with_auto_approve_all(true),
            vec![],
        );
        let outcome = f.agent.chat("loop").await.unwrap();
        assert_eq!(outcome.stop_reason(), StopReason::IterationLimit);
        assert_eq!(outcome.stats.iterations, 2);
        assert_eq!(outcome.text, "(Reached iteration limit, stopping)");
        assert_alternates(f.agent.messages());
    }

    #[tokio::test]
    async fn extracts_calls_from_text() {
        let mut f = fixture(
            vec![
                Ok(ProviderResponse::text(
                    r#"Let me look: {"name": "read_file", "arguments": {"path": "src/lib.rs"}}"#,
                )),
                Ok(ProviderResponse::text("It is a library.")),
            ],
            AgentConfig::default(),
            vec![],
        );
        let outcome = f.agent.chat("what is lib.rs?").await.unwrap();
        assert_eq!(outcome.text, "It is a library.");
        assert_eq!(outcome.stats.tool_call_count, 1);
        assert_eq!(f.events.count("tool_end:read_file:ok"), 1);
        assert!(f.agent.state().working_set.contains_file("src/lib.rs"));

        let messages = f.agent.messages();
        let ids: Vec<&str> = messages[2].tool_result_ids().collect();
        assert_eq!(ids, vec!["extracted_1"]);
    }

    #[tokio::test]
    async fn extraction_can_be_disabled() {
        let text = r#"{"name": "read_file", "arguments": {"path": "a"}}"#;
        let mut f = fixture(
            vec![Ok(ProviderResponse::text(text))],
            AgentConfig::default().with_text_extraction(false),
            vec![],
        );
        let outcome = f.agent.chat("x").await.unwrap();
        assert_eq!(outcome.text, text);
        assert_eq!(outcome.stats.tool_call_count, 0);
    }

    #[tokio::test]
    async fn provider_errors_end_the_turn() {
        let mut f = fixture(
            vec![Err(ProviderError::Http {
                status: 400,
                body: "bad request".into(),
            })],
            AgentConfig::default(),
            vec![],
        );
        let err = f.agent.chat("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
        assert_alternates(f.agent.messages());
    }

    #[tokio::test]
    async fn message_ceiling_triggers_compaction() {
        let history: Vec<Message> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect();
        let mut f = fixture(vec![], AgentConfig::default().with_max_history_messages(4), vec![]);
        f.agent = f.agent.with_state(ConversationState::from_messages(history));

        f.agent.chat("next").await.unwrap();
        assert_eq!(f.events.count("compacted"), 1);
        assert!(f.agent.messages().len() <= 5);
        assert!(f.agent.summary().is_some());

        let sent = &f.provider.requests()[0].messages;
        assert!(sent.len() <= 4);
        assert_eq!(sent[0].role, Role::User);
        assert_alternates(sent);
        assert_alternates(f.agent.messages());
    }

    #[tokio::test]
    async fn approve_pattern_persists_even_when_the_tool_fails() {
        let mut f = fixture(
            vec![
                tool_response(vec![bash_call("c1", "false && cargo build")]),
                Ok(ProviderResponse::text("ok")),
            ],
            AgentConfig::default(),
            vec![ConfirmationResult::ApprovePattern("false*".into())],
        );
        let outcome = f.agent.chat("build").await.unwrap();
        assert!(outcome.stats.tool_calls[0].is_error);
        let approved = f
            .agent
            .gate()
            .with_store_ref(|store| store.is_command_approved("false again"));
        assert!(approved);
    }

    #[tokio::test]
    async fn compression_round_trips_through_the_loop() {
        let path = "crates/tessel/src/context/compression.rs";
        let mut f = fixture(
            vec![Ok(ProviderResponse::text("Looked at [E1] twice."))],
            AgentConfig::default().with_compression(true),
            vec![],
        );
        f.agent = f.agent.with_state(ConversationState::from_messages(vec![
            Message::user(format!("Open {path}, then {path}, then {path}.")),
            Message::assistant(format!("{path} and {path} are the same file.")),
        ]));

        let outcome = f.agent.chat(&format!("Summarize {path}")).await.unwrap();
        let request = &f.provider.requests()[0];
        let system = request.system_prompt.as_deref().unwrap();
        assert!(system.contains(path));
        assert!(!request.messages[0].text().contains(path));
        assert_eq!(outcome.text, format!("Looked at {path} twice."));
        assert_eq!(f.events.count("Compressed"), 1);
    }

    #[tokio::test]
    async fn provider_switch_recomputes_budget_unless_pinned() {
        let mut f = fixture(vec![], AgentConfig::default(), vec![]);
        let before = f.agent.budget().config().context_window;
        f.agent
            .set_provider(Arc::new(ScriptedProvider::new(vec![]).with_context_window(16_000)));
        assert_ne!(before, 16_000);
        assert_eq!(f.agent.budget().config().context_window, 16_000);

        let mut pinned = fixture(
            vec![],
            AgentConfig::default().with_context_window_override(50_000),
            vec![],
        );
        pinned
            .agent
            .set_provider(Arc::new(ScriptedProvider::new(vec![]).with_context_window(16_000)));
        assert_eq!(pinned.agent.budget().config().context_window, 50_000);
    }

    #[tokio::test]
    async fn clear_history_resets_state() {
        let mut f = fixture(vec![], AgentConfig::default(), vec![]);
        f.agent.chat("hello").await.unwrap();
        assert!(!f.agent.messages().is_empty());
        f.agent.clear_history();
        assert!(f.agent.messages().is_empty());
        assert!(f.agent.summary().is_none());
    }

    #[tokio::test]
    async fn checkpoints_are_written_per_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(
            vec![
                tool_response(vec![bash_call("c1", "ls")]),
                Ok(ProviderResponse::text("done")),
            ],
            AgentConfig::default()
                .with_auto_approve_all(true)
                .with_checkpoints(dir.path().join("cp")),
            vec![],
        );
        f.agent.chat("go").await.unwrap();
        let store = f.agent.checkpoints().unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(f.events.count("CheckpointSaved"), 2);

        let first = store.list().unwrap()[0].id.clone();
        f.agent.rewind_to(&first).unwrap();
        assert_eq!(f.agent.messages().len(), 3);
    }
}
