//! The turn orchestrator.
//!
//! `run_turn` drives one user turn through model/tool round-trips: read
//! history, stream one provider response while emitting segment events,
//! persist what the response said, execute any requested tool calls
//! sequentially, and loop until the model answers without calls or the
//! iteration ceiling is hit. Segment numbers come from one monotonically
//! increasing per-turn counter shared across thinking, text, and tool
//! segments, so consumers can replay emission order.
//!
//! A failing tool never aborts the turn; its error envelope flows back
//! into model-visible history like any other result. Only a provider
//! failure aborts, after a best-effort diagnostic write.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::{Value, json};

use delver_core::{
    BaseEvent, ProgressEvent, ToolError, ToolErrorCode, ToolOutcome, TurnStatus,
    derive_segment_title, new_call_id, new_run_id, preview,
};
use delver_history::{CanonicalEvent, ContentBlock, EventKind, HistoryStore, Role, ToolCall};
use delver_settings::OrchestratorSettings;
use delver_tools::{RegistryError, ToolContext, ToolRegistry};

use crate::bridge::{self, BridgeItem};
use crate::emitter::EventEmitter;
use crate::provider::{
    ChatMessage, Provider, ProviderError, ProviderRequest, StreamOutcome, StreamToken,
    ToolCallRequest,
};

const ARGS_PREVIEW_CHARS: usize = 120;

/// Why a turn could not complete.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The provider stream failed; diagnostics were written best-effort
    /// before the abort.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Summary of one completed turn.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnReport {
    /// Run id assigned to the turn.
    pub run_id: String,
    /// Provider round-trips used.
    pub iterations: u32,
    /// Final narrative answer (synthesized on iteration-limit exit).
    pub final_text: String,
    /// Segments opened over the turn.
    pub segments: u32,
    /// Tool calls executed over the turn.
    pub tool_calls: u32,
    /// Whether the iteration ceiling ended the turn.
    pub iteration_limit_exhausted: bool,
}

/// The per-turn segment counter. Shared across thinking, text, and tool
/// segments; numbers are never reused within a turn.
struct SegmentCounter(u32);

impl SegmentCounter {
    fn next(&mut self) -> u32 {
        self.0 += 1;
        self.0
    }

    fn issued(&self) -> u32 {
        self.0
    }
}

/// What streaming accumulated before the provider's final result landed.
#[derive(Default)]
struct Streamed {
    thinking: String,
    text: String,
    opened_text_segment: bool,
}

/// One tool call scheduled for execution, with its assigned segment.
struct PlannedCall {
    segment: u32,
    call: ToolCall,
}

/// Drives one user turn end to end.
pub struct TurnOrchestrator {
    history: HistoryStore,
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn Provider>,
    emitter: Arc<EventEmitter>,
    settings: OrchestratorSettings,
    system_prompt: Option<String>,
}

impl TurnOrchestrator {
    /// Orchestrator over a history store, tool registry, and provider.
    #[must_use]
    pub fn new(
        history: HistoryStore,
        registry: Arc<ToolRegistry>,
        provider: Arc<dyn Provider>,
        emitter: Arc<EventEmitter>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            history,
            registry,
            provider,
            emitter,
            settings,
            system_prompt: None,
        }
    }

    /// Attach a system prompt sent with every provider request.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Run one user turn to completion.
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        user_text: &str,
    ) -> Result<TurnReport, OrchestratorError> {
        let run_id = new_run_id();
        let started = Instant::now();

        let _ = self.history.append_event(
            conversation_id,
            Role::User,
            EventKind::Text,
            json!({"text": user_text}),
            None,
            true,
        );
        let user_msg_index = self.user_message_count(conversation_id);

        self.emitter.emit(ProgressEvent::TurnStart {
            base: BaseEvent::now(conversation_id, &run_id),
            request_index: 1,
            user_msg_index,
        });
        tracing::info!(conversation_id, run_id, user_msg_index, "turn started");

        let mut segments = SegmentCounter(0);
        let mut total_tool_calls = 0u32;

        for iteration in 1..=self.settings.max_iterations {
            let events = self.history.canonical_events(conversation_id);
            let request = ProviderRequest {
                system_prompt: self.system_prompt.clone(),
                messages: messages_from_events(&events),
                tools: self.registry.schemas(),
            };
            let message =
                self.history
                    .create_message(conversation_id, &run_id, iteration, Role::Assistant, None);

            let (streamed, result) = self
                .drive_stream(conversation_id, &run_id, request, &mut segments)
                .await;
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(error) => {
                    let _ = self.history.append_event(
                        conversation_id,
                        Role::System,
                        EventKind::Control,
                        json!({
                            "error": error.to_string(),
                            "runId": run_id,
                            "iteration": iteration,
                        }),
                        Some(message.id.clone()),
                        false,
                    );
                    counter!("delver_turns_total", "status" => "provider_error").increment(1);
                    tracing::error!(conversation_id, run_id, %error, "provider stream failed");
                    return Err(OrchestratorError::Provider(error));
                }
            };

            // Final values win over accumulated tokens.
            let thinking = if outcome.thinking.is_empty() {
                streamed.thinking
            } else {
                outcome.thinking
            };
            let text = if outcome.text.is_empty() {
                streamed.text
            } else {
                outcome.text
            };

            if !text.is_empty() && !streamed.opened_text_segment {
                self.synthesize_text_segment(conversation_id, &run_id, &text, &mut segments);
            }

            let planned: Vec<PlannedCall> = outcome
                .tool_calls
                .into_iter()
                .map(|request| PlannedCall {
                    segment: segments.next(),
                    call: into_tool_call(request),
                })
                .collect();

            self.persist_response(conversation_id, &message.id, &thinking, &text, &planned);

            if planned.is_empty() {
                self.emitter.emit(ProgressEvent::TurnComplete {
                    base: BaseEvent::now(conversation_id, &run_id),
                    status: TurnStatus::Ok,
                    message: (!text.is_empty()).then(|| text.clone()),
                    metadata: json!({"iterations": iteration}),
                });
                counter!("delver_turns_total", "status" => "ok").increment(1);
                histogram!("delver_turn_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(
                    conversation_id,
                    run_id,
                    iterations = iteration,
                    tool_calls = total_tool_calls,
                    "turn completed"
                );
                return Ok(TurnReport {
                    run_id,
                    iterations: iteration,
                    final_text: text,
                    segments: segments.issued(),
                    tool_calls: total_tool_calls,
                    iteration_limit_exhausted: false,
                });
            }

            for planned in planned {
                total_tool_calls += 1;
                self.execute_call(
                    conversation_id,
                    &run_id,
                    &message.id,
                    iteration,
                    user_msg_index,
                    &planned,
                )
                .await;
            }
        }

        // Ceiling hit with tools still pending: a reported condition, not
        // a fault. The final message is synthesized.
        let final_text = iteration_limit_message(self.settings.max_iterations);
        let synth = self.history.create_message(
            conversation_id,
            &run_id,
            self.settings.max_iterations,
            Role::System,
            None,
        );
        let _ = self.history.update_message(&synth.id, |m| {
            m.content.push(ContentBlock::Text {
                text: final_text.clone(),
            });
        });
        let _ = self.history.append_event(
            conversation_id,
            Role::System,
            EventKind::Text,
            json!({"text": final_text}),
            Some(synth.id),
            true,
        );
        self.emitter.emit(ProgressEvent::TurnComplete {
            base: BaseEvent::now(conversation_id, &run_id),
            status: TurnStatus::IterationLimit,
            message: Some(final_text.clone()),
            metadata: json!({
                "maxIterations": self.settings.max_iterations,
                "iterationLimitExhausted": true,
                "trace": {
                    "segments": segments.issued(),
                    "toolCalls": total_tool_calls,
                },
            }),
        });
        counter!("delver_turns_total", "status" => "iteration_limit").increment(1);
        histogram!("delver_turn_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::warn!(
            conversation_id,
            run_id,
            max_iterations = self.settings.max_iterations,
            "turn hit the iteration ceiling"
        );
        Ok(TurnReport {
            run_id,
            iterations: self.settings.max_iterations,
            final_text,
            segments: segments.issued(),
            tool_calls: total_tool_calls,
            iteration_limit_exhausted: true,
        })
    }

    /// Drain one provider stream, lazily opening numbered segments and
    /// emitting start/token/end triads as tokens arrive.
    async fn drive_stream(
        &self,
        conversation_id: &str,
        run_id: &str,
        request: ProviderRequest,
        segments: &mut SegmentCounter,
    ) -> (Streamed, Result<StreamOutcome, ProviderError>) {
        let mut rx = bridge::stream_turn(Arc::clone(&self.provider), request);
        let mut streamed = Streamed::default();
        let mut thinking_open: Option<u32> = None;
        let mut text_open: Option<u32> = None;
        let mut result: Option<Result<StreamOutcome, ProviderError>> = None;

        while let Some(item) = rx.recv().await {
            match item {
                BridgeItem::Token(StreamToken::Thinking(token)) => {
                    if let Some(segment) = text_open.take() {
                        self.emitter.emit(ProgressEvent::TextSegmentEnd {
                            base: BaseEvent::now(conversation_id, run_id),
                            segment,
                        });
                    }
                    let segment = match thinking_open {
                        Some(segment) => segment,
                        None => {
                            let segment = segments.next();
                            thinking_open = Some(segment);
                            self.emitter.emit(ProgressEvent::ThinkingSegmentStart {
                                base: BaseEvent::now(conversation_id, run_id),
                                segment,
                            });
                            segment
                        }
                    };
                    self.emitter.emit(ProgressEvent::ThinkingToken {
                        base: BaseEvent::now(conversation_id, run_id),
                        segment,
                        token: token.clone(),
                    });
                    streamed.thinking.push_str(&token);
                }
                BridgeItem::Token(StreamToken::Text(token)) => {
                    if let Some(segment) = thinking_open.take() {
                        self.emitter.emit(ProgressEvent::ThinkingSegmentEnd {
                            base: BaseEvent::now(conversation_id, run_id),
                            segment,
                            title: derive_segment_title(
                                &streamed.thinking,
                                self.settings.title_max_chars,
                            ),
                        });
                    }
                    let segment = match text_open {
                        Some(segment) => segment,
                        None => {
                            let segment = segments.next();
                            text_open = Some(segment);
                            streamed.opened_text_segment = true;
                            self.emitter.emit(ProgressEvent::TextSegmentStart {
                                base: BaseEvent::now(conversation_id, run_id),
                                segment,
                            });
                            segment
                        }
                    };
                    self.emitter.emit(ProgressEvent::TextToken {
                        base: BaseEvent::now(conversation_id, run_id),
                        segment,
                        token: token.clone(),
                    });
                    streamed.text.push_str(&token);
                }
                BridgeItem::Done(r) => {
                    result = Some(r);
                }
            }
        }

        if let Some(segment) = thinking_open {
            self.emitter.emit(ProgressEvent::ThinkingSegmentEnd {
                base: BaseEvent::now(conversation_id, run_id),
                segment,
                title: derive_segment_title(&streamed.thinking, self.settings.title_max_chars),
            });
        }
        if let Some(segment) = text_open {
            self.emitter.emit(ProgressEvent::TextSegmentEnd {
                base: BaseEvent::now(conversation_id, run_id),
                segment,
            });
        }

        let result = result.unwrap_or_else(|| {
            Err(ProviderError::Stream(
                "stream closed without a final result".into(),
            ))
        });
        (streamed, result)
    }

    /// Emit a full start/tokens/end triad for final text that never
    /// streamed, chunked to the configured size.
    fn synthesize_text_segment(
        &self,
        conversation_id: &str,
        run_id: &str,
        text: &str,
        segments: &mut SegmentCounter,
    ) {
        let segment = segments.next();
        self.emitter.emit(ProgressEvent::TextSegmentStart {
            base: BaseEvent::now(conversation_id, run_id),
            segment,
        });
        for token in chunk_chars(text, self.settings.text_chunk_chars) {
            self.emitter.emit(ProgressEvent::TextToken {
                base: BaseEvent::now(conversation_id, run_id),
                segment,
                token,
            });
        }
        self.emitter.emit(ProgressEvent::TextSegmentEnd {
            base: BaseEvent::now(conversation_id, run_id),
            segment,
        });
    }

    /// Persist one response's content blocks and canonical events.
    fn persist_response(
        &self,
        conversation_id: &str,
        message_id: &str,
        thinking: &str,
        text: &str,
        planned: &[PlannedCall],
    ) {
        let title = derive_segment_title(thinking, self.settings.title_max_chars);
        let _ = self.history.update_message(message_id, |m| {
            if !thinking.is_empty() {
                m.content.push(ContentBlock::Thinking {
                    thinking: thinking.to_string(),
                    title: title.clone(),
                });
            }
            if !text.is_empty() {
                m.content.push(ContentBlock::Text {
                    text: text.to_string(),
                });
            }
            for planned in planned {
                m.content.push(ContentBlock::ToolUse {
                    call: planned.call.clone(),
                });
            }
        });
        if !thinking.is_empty() {
            let _ = self.history.append_event(
                conversation_id,
                Role::Assistant,
                EventKind::Thinking,
                json!({"thinking": thinking, "title": title}),
                Some(message_id.to_string()),
                false,
            );
        }
        if !text.is_empty() {
            let _ = self.history.append_event(
                conversation_id,
                Role::Assistant,
                EventKind::Text,
                json!({"text": text}),
                Some(message_id.to_string()),
                true,
            );
        }
    }

    /// Execute one tool call: `tool_start`, dispatch, `tool_result`, with
    /// the call and result events appended adjacently.
    async fn execute_call(
        &self,
        conversation_id: &str,
        run_id: &str,
        message_id: &str,
        iteration: u32,
        user_msg_index: u32,
        planned: &PlannedCall,
    ) {
        let call = &planned.call;
        let _ = self.history.append_event(
            conversation_id,
            Role::Assistant,
            EventKind::ToolCall,
            json!({"callId": call.id, "toolName": call.name, "input": call.input}),
            Some(message_id.to_string()),
            true,
        );
        self.emitter.emit(ProgressEvent::ToolStart {
            base: BaseEvent::now(conversation_id, run_id),
            segment: planned.segment,
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            args_preview: preview(&call.input.to_string(), ARGS_PREVIEW_CHARS),
        });

        let ctx = ToolContext {
            conversation_id: conversation_id.to_string(),
            run_id: run_id.to_string(),
            request_index: iteration,
            user_msg_index,
            call_id: call.id.clone(),
        };
        let call_started = Instant::now();
        let outcome = match self
            .registry
            .execute(&call.name, call.input.clone(), &ctx)
            .await
        {
            Ok(outcome) => outcome,
            Err(RegistryError::UnknownTool(name)) => ToolOutcome::failure(
                ToolError::new(
                    ToolErrorCode::UnsupportedTool,
                    format!("no tool named '{name}' in the active registry"),
                )
                .with_details(json!({"toolName": name, "available": self.registry.names()})),
            ),
            Err(error) => ToolOutcome::failure(ToolError::new(
                ToolErrorCode::UnsupportedTool,
                error.to_string(),
            )),
        };
        let duration_ms = call_started.elapsed().as_millis() as u64;

        let _ = self.history.append_event(
            conversation_id,
            Role::Tool,
            EventKind::ToolResult,
            json!({"callId": call.id, "toolName": call.name, "outcome": outcome}),
            Some(message_id.to_string()),
            true,
        );
        self.emitter.emit(ProgressEvent::ToolResult {
            base: BaseEvent::now(conversation_id, run_id),
            segment: planned.segment,
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: if outcome.is_error() { "error" } else { "success" }.to_string(),
            duration_ms,
            summary: Some(outcome.summary()),
        });
    }

    fn user_message_count(&self, conversation_id: &str) -> u32 {
        self.history
            .canonical_events(conversation_id)
            .iter()
            .filter(|e| e.role == Role::User && e.kind == EventKind::Text)
            .count() as u32
    }
}

/// The synthesized final message for an iteration-limit exit.
#[must_use]
pub fn iteration_limit_message(max_iterations: u32) -> String {
    format!(
        "I stopped after reaching the tool-iteration limit ({max_iterations}) before \
         producing a final narrative answer. Please continue with a narrower scope or \
         a higher iteration budget."
    )
}

/// Convert canonical history into provider-facing messages.
///
/// Thinking and control events never replay. Tool calls replay as
/// assistant messages carrying the call; tool results replay as tool
/// messages keyed by call id. Invisible events are skipped.
#[must_use]
pub fn messages_from_events(events: &[CanonicalEvent]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    for event in events {
        if !event.visible {
            continue;
        }
        match event.kind {
            EventKind::Text => {
                let text = event
                    .content
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match event.role {
                    Role::User => messages.push(ChatMessage::user(text)),
                    Role::Assistant | Role::System => messages.push(ChatMessage::assistant(text)),
                    Role::Tool => {}
                }
            }
            EventKind::ToolCall => {
                let call = ToolCallRequest {
                    id: content_str(event, "callId"),
                    name: content_str(event, "toolName"),
                    arguments: event.content.get("input").cloned().unwrap_or(Value::Null),
                    provider_fields: Value::Null,
                };
                messages.push(ChatMessage::assistant_calls(String::new(), vec![call]));
            }
            EventKind::ToolResult => {
                let call_id = content_str(event, "callId");
                let content = event
                    .content
                    .get("outcome")
                    .map(Value::to_string)
                    .unwrap_or_default();
                messages.push(ChatMessage::tool(call_id, content));
            }
            EventKind::Thinking | EventKind::Control => {}
        }
    }
    messages
}

fn content_str(event: &CanonicalEvent, key: &str) -> String {
    event
        .content
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn into_tool_call(request: ToolCallRequest) -> ToolCall {
    ToolCall {
        id: if request.id.is_empty() {
            new_call_id()
        } else {
            request.id
        },
        name: request.name,
        input: request.arguments,
        provider_fields: request.provider_fields,
    }
}

/// Split text into chunks of at most `size` chars, respecting char
/// boundaries.
fn chunk_chars(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for c in text.chars() {
        current.push(c);
        count += 1;
        if count == size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    use delver_tools::{SchemaBuilder, Tool};

    struct ScriptedTurn {
        tokens: Vec<StreamToken>,
        result: Result<StreamOutcome, ProviderError>,
    }

    struct ScriptedProvider {
        turns: Mutex<VecDeque<ScriptedTurn>>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<ScriptedTurn>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
            })
        }
    }

    impl Provider for ScriptedProvider {
        fn stream_turn(
            &self,
            _request: &ProviderRequest,
            on_token: &mut dyn FnMut(StreamToken),
        ) -> Result<StreamOutcome, ProviderError> {
            let turn = self
                .turns
                .lock()
                .pop_front()
                .expect("scripted provider ran out of turns");
            for token in turn.tokens {
                on_token(token);
            }
            turn.result
        }
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the query back"
        }
        fn input_schema(&self) -> Value {
            SchemaBuilder::object()
                .required_string("query", "Text to echo")
                .build()
        }
        async fn run(
            &self,
            payload: serde_json::Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<Value, ToolError> {
            Ok(json!({"summary": "echoed", "echo": payload["query"]}))
        }
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments: args,
            provider_fields: Value::Null,
        }
    }

    fn text_turn(text: &str) -> ScriptedTurn {
        ScriptedTurn {
            tokens: vec![StreamToken::Text(text.into())],
            result: Ok(StreamOutcome {
                text: text.into(),
                ..StreamOutcome::default()
            }),
        }
    }

    fn tool_turn(calls: Vec<ToolCallRequest>) -> ScriptedTurn {
        ScriptedTurn {
            tokens: Vec::new(),
            result: Ok(StreamOutcome {
                tool_calls: calls,
                ..StreamOutcome::default()
            }),
        }
    }

    fn orchestrator(
        provider: Arc<ScriptedProvider>,
        settings: OrchestratorSettings,
    ) -> (TurnOrchestrator, HistoryStore, Arc<EventEmitter>) {
        let history = HistoryStore::new();
        let emitter = Arc::new(EventEmitter::new(1024));
        let registry = Arc::new(ToolRegistry::new(vec![Arc::new(Echo)]));
        let orchestrator = TurnOrchestrator::new(
            history.clone(),
            registry,
            provider,
            Arc::clone(&emitter),
            settings,
        );
        (orchestrator, history, emitter)
    }

    fn drain(
        rx: &mut tokio::sync::broadcast::Receiver<ProgressEvent>,
    ) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn plain_answer_completes_in_one_iteration() {
        let provider = ScriptedProvider::new(vec![text_turn("hello there")]);
        let (orch, history, emitter) = orchestrator(provider, OrchestratorSettings::default());
        let mut rx = emitter.subscribe();

        let report = orch.run_turn("conv-1", "hi").await.unwrap();
        assert_eq!(report.final_text, "hello there");
        assert_eq!(report.iterations, 1);
        assert_eq!(report.tool_calls, 0);
        assert!(!report.iteration_limit_exhausted);

        let events = drain(&mut rx);
        assert_eq!(events.first().unwrap().event_type(), "turn_start");
        let last = events.last().unwrap();
        assert_eq!(last.event_type(), "turn_complete");
        assert_matches::assert_matches!(
            last,
            ProgressEvent::TurnComplete { status: TurnStatus::Ok, .. }
        );

        // User text then assistant text in history.
        let history_events = history.canonical_events("conv-1");
        assert_eq!(history_events[0].kind, EventKind::Text);
        assert_eq!(history_events[0].role, Role::User);
        assert_eq!(
            history_events.last().unwrap().content["text"],
            "hello there"
        );
    }

    #[tokio::test]
    async fn call_and_result_events_are_adjacent_and_matched() {
        let provider = ScriptedProvider::new(vec![
            tool_turn(vec![
                call("call_a", "echo", json!({"query": "one"})),
                call("call_b", "echo", json!({"query": "two"})),
            ]),
            text_turn("done"),
        ]);
        let (orch, history, _emitter) = orchestrator(provider, OrchestratorSettings::default());

        let report = orch.run_turn("conv-1", "go").await.unwrap();
        assert_eq!(report.tool_calls, 2);

        let events = history.canonical_events("conv-1");
        let call_positions: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == EventKind::ToolCall)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(call_positions.len(), 2);
        for i in call_positions {
            let result = &events[i + 1];
            assert_eq!(result.kind, EventKind::ToolResult);
            assert_eq!(result.content["callId"], events[i].content["callId"]);
        }
        let result_count = events
            .iter()
            .filter(|e| e.kind == EventKind::ToolResult)
            .count();
        assert_eq!(result_count, 2);
    }

    #[tokio::test]
    async fn segment_numbers_strictly_increase_across_kinds() {
        let provider = ScriptedProvider::new(vec![
            ScriptedTurn {
                tokens: vec![
                    StreamToken::Thinking("weighing the options".into()),
                    StreamToken::Text("let me check".into()),
                ],
                result: Ok(StreamOutcome {
                    thinking: "weighing the options".into(),
                    text: "let me check".into(),
                    tool_calls: vec![call("call_a", "echo", json!({"query": "x"}))],
                    provider_state: Value::Null,
                }),
            },
            text_turn("answer"),
        ]);
        let (orch, _history, emitter) = orchestrator(provider, OrchestratorSettings::default());
        let mut rx = emitter.subscribe();

        let report = orch.run_turn("conv-1", "go").await.unwrap();

        let events = drain(&mut rx);
        let mut first_seen: Vec<u32> = Vec::new();
        for event in &events {
            if let Some(segment) = event.segment() {
                if !first_seen.contains(&segment) {
                    first_seen.push(segment);
                }
            }
        }
        // Thinking, text, tool, then next iteration's text: four distinct
        // segments in strictly increasing first-seen order.
        assert_eq!(first_seen, vec![1, 2, 3, 4]);
        assert_eq!(report.segments, 4);
    }

    #[tokio::test]
    async fn iteration_limit_synthesizes_the_final_message() {
        let settings = OrchestratorSettings {
            max_iterations: 2,
            ..OrchestratorSettings::default()
        };
        let provider = ScriptedProvider::new(vec![
            tool_turn(vec![call("call_a", "echo", json!({"query": "x"}))]),
            tool_turn(vec![call("call_b", "echo", json!({"query": "y"}))]),
        ]);
        let (orch, history, emitter) = orchestrator(provider, settings);
        let mut rx = emitter.subscribe();

        let report = orch.run_turn("conv-1", "go").await.unwrap();
        assert!(report.iteration_limit_exhausted);
        assert_eq!(report.iterations, 2);
        assert_eq!(
            report.final_text,
            "I stopped after reaching the tool-iteration limit (2) before producing a \
             final narrative answer. Please continue with a narrower scope or a higher \
             iteration budget."
        );

        let events = drain(&mut rx);
        let complete = events.last().unwrap();
        assert_matches::assert_matches!(
            complete,
            ProgressEvent::TurnComplete {
                status: TurnStatus::IterationLimit,
                message: Some(message),
                metadata,
                ..
            } if message == &report.final_text
                && metadata["iterationLimitExhausted"] == json!(true)
                && metadata["maxIterations"] == json!(2)
        );

        // The synthesized message lands in history, model-visible.
        let last = history.canonical_events("conv-1").last().unwrap().clone();
        assert_eq!(last.role, Role::System);
        assert_eq!(last.content["text"], report.final_text);
        assert!(last.visible);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_an_error_envelope_not_an_abort() {
        let provider = ScriptedProvider::new(vec![
            tool_turn(vec![call("call_a", "ghost", json!({}))]),
            text_turn("recovered"),
        ]);
        let (orch, history, _emitter) = orchestrator(provider, OrchestratorSettings::default());

        let report = orch.run_turn("conv-1", "go").await.unwrap();
        assert_eq!(report.final_text, "recovered");

        let events = history.canonical_events("conv-1");
        let result = events
            .iter()
            .find(|e| e.kind == EventKind::ToolResult)
            .unwrap();
        assert_eq!(result.content["outcome"]["status"], "error");
        assert_eq!(
            result.content["outcome"]["error"]["code"],
            "UNSUPPORTED_TOOL"
        );
        assert!(
            result.content["outcome"]["error"]["message"]
                .as_str()
                .unwrap()
                .contains("ghost")
        );
    }

    #[tokio::test]
    async fn unstreamed_final_text_synthesizes_a_chunked_segment() {
        let settings = OrchestratorSettings {
            text_chunk_chars: 4,
            ..OrchestratorSettings::default()
        };
        let provider = ScriptedProvider::new(vec![ScriptedTurn {
            tokens: Vec::new(),
            result: Ok(StreamOutcome {
                text: "abcdefghij".into(),
                ..StreamOutcome::default()
            }),
        }]);
        let (orch, _history, emitter) = orchestrator(provider, settings);
        let mut rx = emitter.subscribe();

        let report = orch.run_turn("conv-1", "go").await.unwrap();
        assert_eq!(report.final_text, "abcdefghij");

        let events = drain(&mut rx);
        let tokens: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::TextToken { token, .. } => Some(token.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, vec!["abcd", "efgh", "ij"]);
        assert!(
            events
                .iter()
                .any(|e| e.event_type() == "text_segment_start")
        );
        assert!(events.iter().any(|e| e.event_type() == "text_segment_end"));
    }

    #[tokio::test]
    async fn provider_failure_aborts_with_a_diagnostic() {
        let provider = ScriptedProvider::new(vec![ScriptedTurn {
            tokens: Vec::new(),
            result: Err(ProviderError::Stream("connection reset".into())),
        }]);
        let (orch, history, _emitter) = orchestrator(provider, OrchestratorSettings::default());

        let error = orch.run_turn("conv-1", "go").await.unwrap_err();
        assert_matches::assert_matches!(error, OrchestratorError::Provider(_));

        let last = history.canonical_events("conv-1").last().unwrap().clone();
        assert_eq!(last.kind, EventKind::Control);
        assert!(
            last.content["error"]
                .as_str()
                .unwrap()
                .contains("connection reset")
        );
        assert!(!last.visible);
    }

    #[tokio::test]
    async fn final_values_win_over_streamed_tokens() {
        let provider = ScriptedProvider::new(vec![ScriptedTurn {
            tokens: vec![StreamToken::Text("partial".into())],
            result: Ok(StreamOutcome {
                text: "full corrected answer".into(),
                ..StreamOutcome::default()
            }),
        }]);
        let (orch, history, _emitter) = orchestrator(provider, OrchestratorSettings::default());

        let report = orch.run_turn("conv-1", "go").await.unwrap();
        assert_eq!(report.final_text, "full corrected answer");
        let last = history.canonical_events("conv-1").last().unwrap().clone();
        assert_eq!(last.content["text"], "full corrected answer");
    }

    #[test]
    fn messages_from_events_replays_visible_history_only() {
        let store = HistoryStore::new();
        let _ = store.append_event(
            "c1",
            Role::User,
            EventKind::Text,
            json!({"text": "hi"}),
            None,
            true,
        );
        let _ = store.append_event(
            "c1",
            Role::Assistant,
            EventKind::Thinking,
            json!({"thinking": "hidden"}),
            None,
            false,
        );
        let _ = store.append_event(
            "c1",
            Role::Assistant,
            EventKind::ToolCall,
            json!({"callId": "call_1", "toolName": "echo", "input": {"query": "x"}}),
            None,
            true,
        );
        let _ = store.append_event(
            "c1",
            Role::Tool,
            EventKind::ToolResult,
            json!({"callId": "call_1", "outcome": {"status": "success"}}),
            None,
            true,
        );
        let _ = store.append_event(
            "c1",
            Role::Assistant,
            EventKind::Text,
            json!({"text": "done"}),
            None,
            true,
        );

        let messages = messages_from_events(&store.canonical_events("c1"));
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].tool_calls[0].name, "echo");
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[3].content, "done");
    }

    #[test]
    fn chunking_respects_char_boundaries() {
        assert_eq!(chunk_chars("héllo", 2), vec!["hé", "ll", "o"]);
        assert!(chunk_chars("", 4).is_empty());
    }
}
