//! Test doubles shared by the crate's unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::agent::events::{AgentEvent, EventHandler};
use crate::api::{ChatRequest, Provider, ProviderFuture, ProviderResponse, StreamSink};
use crate::approval::{ConfirmFuture, ConfirmationHandler, ConfirmationRequest, ConfirmationResult};
use crate::error::ProviderError;
use crate::Message;

/// What a [`ScriptedProvider`] saw for one call.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tool_names: Vec<String>,
}

/// Provider replaying canned responses in order. Once the script runs out
/// it answers with plain "done".
pub(crate) struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    context_window: usize,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            context_window: 128_000,
            delay: None,
        }
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn stream_chat<'a>(
        &'a self,
        request: ChatRequest<'a>,
        sink: &'a mut (dyn StreamSink + Send),
    ) -> ProviderFuture<'a> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: request.messages.to_vec(),
            system_prompt: request.system_prompt.map(str::to_string),
            tool_names: request
                .tools
                .unwrap_or_default()
                .iter()
                .map(|t| t.name().to_string())
                .collect(),
        });
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ProviderResponse::text("done")));
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Ok(response) = &next {
                if let Some(reasoning) = &response.reasoning_content {
                    sink.on_reasoning(reasoning);
                }
                // Split to exercise chunk boundaries.
                let mid = response.content.char_indices().nth(response.content.chars().count() / 2);
                match mid {
                    Some((at, _)) => {
                        sink.on_text(&response.content[..at]);
                        sink.on_text(&response.content[at..]);
                    }
                    None => sink.on_text(&response.content),
                }
            }
            next
        })
    }
}

/// Records a compact label per event.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    events: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl EventHandler for RecordingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        let label = match event {
            AgentEvent::IterationStart { iteration, .. } => format!("iteration:{iteration}"),
            AgentEvent::TextDelta(t) => format!("delta:{t}"),
            AgentEvent::ToolStart { call } => format!("tool_start:{}", call.name),
            AgentEvent::ToolEnd { call, result, .. } => {
                format!("tool_end:{}:{}", call.name, if result.is_error { "err" } else { "ok" })
            }
            AgentEvent::ToolDenied { call } => format!("tool_denied:{}", call.name),
            AgentEvent::Compacted { .. } => "compacted".into(),
            AgentEvent::Finished { reason } => format!("finished:{reason:?}"),
            other => format!("{other:?}"),
        };
        self.events.lock().unwrap().push(label);
    }
}

/// Confirmation handler answering from a script; approves once exhausted.
#[derive(Default)]
pub(crate) struct ScriptedConfirmer {
    answers: Mutex<VecDeque<ConfirmationResult>>,
    seen: Mutex<Vec<ConfirmationRequest>>,
}

impl ScriptedConfirmer {
    pub fn new(answers: Vec<ConfirmationResult>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<ConfirmationRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl ConfirmationHandler for ScriptedConfirmer {
    fn confirm<'a>(&'a self, request: &'a ConfirmationRequest) -> ConfirmFuture<'a> {
        self.seen.lock().unwrap().push(request.clone());
        let answer = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConfirmationResult::Approve);
        Box::pin(async move { answer })
    }
}
