//! The turn orchestrator.
//!
//! One turn runs: load state → render the user message into history → ask
//! the model with every tool schema → dispatch any tool calls → (maybe) ask
//! the model again with the tool outputs → apply updates, record the reply,
//! persist. Any failure along the way becomes a localized apology, and the
//! state accumulated so far is still persisted. Cancellation skips persist.

use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use tellerline_config::AppConfig;
use tellerline_core::error::ToolError;
use tellerline_core::event::{DomainEvent, EventBus};
use tellerline_core::language::Locale;
use tellerline_core::memory::StateStore;
use tellerline_core::message::{Message, MessageToolCall, Role};
use tellerline_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use tellerline_core::state::ConversationState;
use tellerline_core::tool::{ToolExecutionResult, ToolRegistry};
use tellerline_core::turn::{AgentReply, ChatbotMessage};
use tellerline_core::updates::{merge_context_updates, ContextUpdates};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::fallback::{fallback_reply, tool_unavailable_text, TurnCancelled, TurnError};
use crate::prompt::{render_user_message, DEFAULT_SYSTEM_PROMPT};

/// Model and conversation knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Language used when the conversation has none (`uk` or `en`)
    pub default_language: String,
    pub system_prompt: String,
    pub max_history_messages: usize,
    /// How many rounds of tool calls one turn may dispatch
    pub max_tool_rounds: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: 0.2,
            top_p: None,
            max_tokens: None,
            default_language: "uk".into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_history_messages: 20,
            max_tool_rounds: 2,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.provider.model.clone(),
            temperature: config.provider.temperature,
            top_p: Some(config.provider.top_p),
            max_tokens: config.provider.max_tokens,
            default_language: config.agent.default_language.clone(),
            system_prompt: config
                .agent
                .system_prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            max_history_messages: config.state.max_history_messages,
            max_tool_rounds: config.agent.max_tool_rounds,
        }
    }
}

/// What one round of tool dispatch ended with.
enum RoundOutcome {
    /// The turn's reply is known
    Reply(AgentReply),
    /// Outputs the model has to turn into a reply
    PostProcess {
        assistant: Message,
        outputs: Vec<Message>,
    },
}

/// Coordinates the model, the tools and the state store for each turn.
pub struct TurnOrchestrator {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    registry: Arc<ToolRegistry>,
    settings: OrchestratorSettings,
    events: Option<Arc<EventBus>>,
}

impl TurnOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn StateStore>,
        registry: Arc<ToolRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            provider,
            store,
            registry,
            settings,
            events: None,
        }
    }

    /// Publish turn and tool events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one chat turn.
    ///
    /// Always yields a reply unless `cancel` fires first; failures become the
    /// localized fallback with `metadata.last_error` recorded.
    pub async fn handle_turn(
        &self,
        message: &ChatbotMessage,
        cancel: &CancellationToken,
    ) -> Result<AgentReply, TurnCancelled> {
        let started = Instant::now();
        let chat_id = message.chat_id.as_str();
        info!(chat_id = %chat_id, "Handling turn");

        let mut state = match self.store.load(chat_id, &message.context).await {
            Ok(state) => state,
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "State load failed, starting fresh");
                let mut state = ConversationState::new(chat_id);
                state.merge_inbound_context(&message.context);
                state
            }
        };

        let language = state.language_or(&self.settings.default_language).to_string();
        let rendered = render_user_message(message, &state, &language, Utc::now());
        state.append_history(Role::User, rendered, self.settings.max_history_messages);

        let mut dispatched = 0usize;
        let reply = match self.run(&mut state, cancel, &mut dispatched).await {
            Ok(reply) => reply,
            Err(TurnError::Cancelled) => {
                info!(chat_id = %chat_id, "Turn cancelled, state left untouched");
                return Err(TurnCancelled);
            }
            Err(e) => {
                warn!(chat_id = %chat_id, kind = e.kind(), error = %e, "Turn failed, serving fallback");
                self.publish(DomainEvent::FallbackServed {
                    chat_id: chat_id.to_string(),
                    kind: e.kind().to_string(),
                    timestamp: Utc::now(),
                });
                fallback_reply(self.locale(&state), &e)
            }
        };

        state.apply_updates(&reply.context_updates);
        if let Some(text) = reply.history_text() {
            state.append_history(Role::Assistant, text, self.settings.max_history_messages);
        }
        if let Err(e) = self.store.persist(&state).await {
            warn!(chat_id = %chat_id, error = %e, "Failed to persist conversation state");
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            chat_id = %chat_id,
            event = %reply.event,
            tool_calls = dispatched,
            duration_ms,
            "Turn completed"
        );
        self.publish(DomainEvent::TurnCompleted {
            chat_id: chat_id.to_string(),
            event: reply.event.to_string(),
            tool_calls: dispatched,
            duration_ms,
            timestamp: Utc::now(),
        });

        Ok(reply)
    }

    /// Answer a standalone question: one model call, no tools, no state.
    pub async fn answer_direct(
        &self,
        question: &str,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AgentReply, TurnCancelled> {
        let mut ephemeral = ConversationState::new("direct");
        ephemeral.language = language
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string);

        let messages = vec![
            Message::system(&self.settings.system_prompt),
            Message::user(question),
        ];

        let outcome = match self.complete(messages, Vec::new(), cancel).await {
            Ok(response) => match response.message.content.trim() {
                "" => Err(TurnError::EmptyModelResponse),
                text => Ok(AgentReply::send(text, ContextUpdates::new())),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(reply) => Ok(reply),
            Err(TurnError::Cancelled) => Err(TurnCancelled),
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Direct answer failed, serving fallback");
                Ok(fallback_reply(self.locale(&ephemeral), &e))
            }
        }
    }

    /// Model rounds until a reply is known.
    async fn run(
        &self,
        state: &mut ConversationState,
        cancel: &CancellationToken,
        dispatched: &mut usize,
    ) -> Result<AgentReply, TurnError> {
        let mut messages = self.history_messages(state);
        let mut tools = self.registry.definitions();
        let mut collected: Vec<ContextUpdates> = Vec::new();
        let mut rounds = 0u32;

        loop {
            let response = self.complete(messages.clone(), tools, cancel).await?;
            let calls = response.message.tool_calls;

            if calls.is_empty() {
                let text = response.message.content.trim();
                if text.is_empty() {
                    return Err(TurnError::EmptyModelResponse);
                }
                return Ok(AgentReply::send(text, merge_context_updates(&collected)));
            }

            // the first dispatch round always runs
            if rounds >= self.settings.max_tool_rounds.max(1) {
                return Err(TurnError::ToolRoundsExceeded(rounds));
            }
            rounds += 1;

            match self
                .dispatch_round(&calls, state, cancel, &mut collected, dispatched)
                .await?
            {
                RoundOutcome::Reply(reply) => return Ok(reply),
                RoundOutcome::PostProcess { assistant, outputs } => {
                    debug!(
                        chat_id = %state.chat_id,
                        round = rounds,
                        outputs = outputs.len(),
                        "Sending tool outputs back to the model"
                    );
                    messages.push(assistant);
                    messages.extend(outputs);
                    tools = Vec::new();
                }
            }
        }
    }

    /// Dispatch the calls of one model response, in order.
    async fn dispatch_round(
        &self,
        calls: &[MessageToolCall],
        state: &mut ConversationState,
        cancel: &CancellationToken,
        collected: &mut Vec<ContextUpdates>,
        dispatched: &mut usize,
    ) -> Result<RoundOutcome, TurnError> {
        let locale = self.locale(state);
        let mut results: Vec<(&MessageToolCall, ToolExecutionResult)> = Vec::new();

        for call in calls {
            if call.name.trim().is_empty() {
                warn!(chat_id = %state.chat_id, call_id = %call.id, "Skipping tool call without a name");
                continue;
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TurnError::Cancelled),
                outcome = self.registry.execute(&call.name, &call.arguments, state, locale) => outcome,
            };
            *dispatched += 1;

            let duration_ms = started.elapsed().as_millis() as u64;
            self.publish(DomainEvent::ToolExecuted {
                chat_id: state.chat_id.clone(),
                tool_name: call.name.clone(),
                success: outcome.is_ok(),
                duration_ms,
                timestamp: Utc::now(),
            });

            let result = match outcome {
                Ok(result) => result,
                Err(ToolError::NotFound(name)) => {
                    warn!(chat_id = %state.chat_id, tool = %name, "Unknown tool requested");
                    return Ok(RoundOutcome::Reply(AgentReply::notice(
                        tool_unavailable_text(locale),
                        ContextUpdates::new(),
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            debug!(
                chat_id = %state.chat_id,
                tool = %call.name,
                event = %result.event,
                post_process = result.post_process,
                duration_ms,
                "Tool executed"
            );

            if !result.context_updates.is_empty() {
                state.apply_updates(&result.context_updates);
                collected.push(result.context_updates.clone());
            }

            if result.is_terminal() {
                return Ok(RoundOutcome::Reply(AgentReply::new(
                    result.event,
                    result.data,
                    merge_context_updates(collected.iter()),
                )));
            }
            results.push((call, result));
        }

        if results.is_empty() {
            return Err(TurnError::EmptyModelResponse);
        }

        let mut assistant_calls = Vec::new();
        let mut outputs = Vec::new();
        for (idx, (call, result)) in results.iter().enumerate() {
            if !result.post_process {
                continue;
            }
            let id = if call.id.is_empty() {
                format!("tool_call_{idx}")
            } else {
                call.id.clone()
            };
            let arguments = if call.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                call.arguments.clone()
            };
            outputs.push(Message::tool_result(&id, &result.data));
            assistant_calls.push(MessageToolCall {
                id,
                name: call.name.clone(),
                arguments,
            });
        }

        if !assistant_calls.is_empty() {
            return Ok(RoundOutcome::PostProcess {
                assistant: Message::assistant_tool_calls(assistant_calls),
                outputs,
            });
        }

        let text = results
            .iter()
            .map(|(_, result)| result.data.as_str())
            .filter(|data| !data.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(RoundOutcome::Reply(AgentReply::send(
            text,
            merge_context_updates(collected.iter()),
        )))
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, TurnError> {
        debug!(
            provider = %self.provider.name(),
            messages = messages.len(),
            tools = tools.len(),
            "Invoking model"
        );
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            max_tokens: self.settings.max_tokens,
            tools,
        };
        let response = self.provider.complete_with_cancel(request, cancel).await?;
        if let Some(usage) = &response.usage {
            debug!(model = %response.model, tokens = usage.total_tokens, "Model responded");
        }
        Ok(response)
    }

    /// System prompt followed by the stored history.
    fn history_messages(&self, state: &ConversationState) -> Vec<Message> {
        std::iter::once(Message::system(&self.settings.system_prompt))
            .chain(
                state
                    .history
                    .iter()
                    .map(|entry| Message::from_history(entry.role, &entry.content)),
            )
            .collect()
    }

    fn locale(&self, state: &ConversationState) -> Locale {
        Locale::from_tag(state.language_or(&self.settings.default_language))
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tellerline_core::error::{MemoryError, ProviderError};
    use tellerline_core::tool::{Tool, ToolContext};
    use tellerline_core::turn::{ChatContext, ReplyEvent};
    use tellerline_core::updates::patch_from;
    use tellerline_memory::InMemoryStateStore;

    /// Replays scripted responses and records every request.
    struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Network("script exhausted".into())))
        }
    }

    fn text(content: &str) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant(content),
            usage: None,
            model: "test-model".into(),
        })
    }

    fn calls(calls: &[(&str, &str, &str)]) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant_tool_calls(
                calls
                    .iter()
                    .map(|(id, name, arguments)| MessageToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    })
                    .collect(),
            ),
            usage: None,
            model: "test-model".into(),
        })
    }

    #[derive(Deserialize)]
    struct Empty {}

    /// Returns a fixed result and counts invocations.
    struct FixedTool {
        name: &'static str,
        result: ToolExecutionResult,
        calls: Arc<AtomicUsize>,
    }

    impl FixedTool {
        fn new(name: &'static str, result: ToolExecutionResult) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    result,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Tool for FixedTool {
        type Args = Empty;

        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "Returns a fixed result"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn call(&self, _args: Empty, _ctx: ToolContext<'_>) -> Result<ToolExecutionResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    /// Echoes the `note` slot another tool may have set earlier in the turn.
    struct ReadSlotTool;

    #[async_trait]
    impl Tool for ReadSlotTool {
        type Args = Empty;

        fn name(&self) -> &str {
            "read_note"
        }
        fn description(&self) -> &str {
            "Reads the note slot"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn call(&self, _args: Empty, ctx: ToolContext<'_>) -> Result<ToolExecutionResult, ToolError> {
            let note = ctx.state.slots.get("note").and_then(|v| v.as_str()).unwrap_or("none");
            Ok(ToolExecutionResult::send(format!("note={note}")))
        }
    }

    #[derive(Deserialize)]
    struct NeedsId {
        #[allow(dead_code)]
        id: i64,
    }

    struct StrictTool;

    #[async_trait]
    impl Tool for StrictTool {
        type Args = NeedsId;

        fn name(&self) -> &str {
            "strict"
        }
        fn description(&self) -> &str {
            "Requires an id"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"id": {"type": "integer"}}, "required": ["id"]})
        }
        async fn call(&self, _args: NeedsId, _ctx: ToolContext<'_>) -> Result<ToolExecutionResult, ToolError> {
            Ok(ToolExecutionResult::send("ok"))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        type Args = Empty;

        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn call(&self, _args: Empty, _ctx: ToolContext<'_>) -> Result<ToolExecutionResult, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "broken".into(),
                reason: "backend exploded".into(),
            })
        }
    }

    struct Harness {
        orchestrator: TurnOrchestrator,
        provider: Arc<ScriptedProvider>,
        store: Arc<InMemoryStateStore>,
    }

    impl Harness {
        async fn stored(&self, chat_id: &str) -> ConversationState {
            self.store.load(chat_id, &ChatContext::default()).await.unwrap()
        }
    }

    fn harness(
        responses: Vec<Result<ProviderResponse, ProviderError>>,
        registry: ToolRegistry,
        settings: OrchestratorSettings,
    ) -> Harness {
        let provider = ScriptedProvider::new(responses);
        let store = Arc::new(InMemoryStateStore::default());
        let orchestrator = TurnOrchestrator::new(
            provider.clone(),
            store.clone(),
            Arc::new(registry),
            settings,
        );
        Harness {
            orchestrator,
            provider,
            store,
        }
    }

    fn message(text: &str) -> ChatbotMessage {
        ChatbotMessage::new("chat-1", text)
    }

    #[tokio::test]
    async fn plain_reply_is_recorded_in_history() {
        let h = harness(
            vec![text("  Вітаю! Чим можу допомогти?  ")],
            ToolRegistry::new(),
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("Привіт"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.event, ReplyEvent::Send);
        assert_eq!(reply.data, "Вітаю! Чим можу допомогти?");

        let state = h.stored("chat-1").await;
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history[0].role, Role::User);
        assert!(state.history[0].content.contains("\"text\": \"Привіт\""));
        assert_eq!(state.history[1].role, Role::Assistant);
        assert_eq!(state.history[1].content, "Вітаю! Чим можу допомогти?");

        let requests = h.provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert_eq!(requests[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn every_tool_schema_is_offered() {
        let mut registry = ToolRegistry::new();
        registry.register(ReadSlotTool);
        registry.register(StrictTool);
        let h = harness(vec![text("ok")], registry, OrchestratorSettings::default());

        h.orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<_> = h.provider.requests()[0]
            .tools
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["read_note", "strict"]);
    }

    #[tokio::test]
    async fn function_result_short_circuits_remaining_calls() {
        let (first, _) = FixedTool::new(
            "first",
            ToolExecutionResult::send("first output")
                .with_updates(patch_from(json!({"slots": {"a": 1}}))),
        );
        let (second, _) = FixedTool::new(
            "second",
            ToolExecutionResult::function("get_balance")
                .with_updates(patch_from(json!({"slots": {"b": 2}}))),
        );
        let (third, third_calls) = FixedTool::new("third", ToolExecutionResult::send("third output"));
        let mut registry = ToolRegistry::new();
        registry.register(first);
        registry.register(second);
        registry.register(third);

        let h = harness(
            vec![calls(&[("c1", "first", "{}"), ("c2", "second", "{}"), ("c3", "third", "{}")])],
            registry,
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("баланс"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.event, ReplyEvent::Function);
        assert_eq!(reply.data, "get_balance");
        assert_eq!(reply.context_updates["slots"], json!({"a": 1, "b": 2}));
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.provider.requests().len(), 1);

        let state = h.stored("chat-1").await;
        assert_eq!(state.slots["a"], 1);
        assert_eq!(state.slots["b"], 2);
        assert_eq!(state.history.len(), 1, "function replies stay out of history");
    }

    #[tokio::test]
    async fn function_result_wins_over_earlier_model_bound_output() {
        let (accounts, accounts_calls) = FixedTool::new(
            "accounts",
            ToolExecutionResult::for_model(r#"[{"id":101}]"#)
                .with_updates(patch_from(json!({"slots": {"client_id": 12}}))),
        );
        let (statement, _) = FixedTool::new(
            "statement",
            ToolExecutionResult::function("get_statement(accountid=101,datefrom=2025-01-01,dateinto=2025-01-31)"),
        );
        let mut registry = ToolRegistry::new();
        registry.register(accounts);
        registry.register(statement);

        let h = harness(
            vec![
                calls(&[("c1", "accounts", "{}"), ("c2", "statement", "{}")]),
                text("never requested"),
            ],
            registry,
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("виписка"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.event, ReplyEvent::Function);
        assert_eq!(
            reply.data,
            "get_statement(accountid=101,datefrom=2025-01-01,dateinto=2025-01-31)"
        );
        assert_eq!(reply.context_updates["slots"], json!({"client_id": 12}));
        assert_eq!(accounts_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider.requests().len(), 1);

        let state = h.stored("chat-1").await;
        assert_eq!(state.slots["client_id"], 12);
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn post_process_round_sends_exact_tool_messages() {
        let payload = r#"{"accounts":[{"IBAN":"UA21","balance":"10.00"}]}"#;
        let (lookup, _) = FixedTool::new("lookup", ToolExecutionResult::for_model(payload));
        let mut registry = ToolRegistry::new();
        registry.register(lookup);

        let h = harness(
            vec![
                calls(&[("call_abc", "lookup", r#"{"x":1}"#)]),
                text("На рахунку UA21 10.00 грн."),
            ],
            registry,
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("скільки грошей?"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.event, ReplyEvent::Send);
        assert_eq!(reply.data, "На рахунку UA21 10.00 грн.");

        let requests = h.provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].tools.is_empty());
        assert!(requests[1].tools.is_empty());

        let messages = &requests[1].messages;
        let n = messages.len();
        assert_eq!(n, 4, "system, user, assistant, tool");

        let assistant = &messages[n - 2];
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.content, "");
        assert_eq!(
            assistant.tool_calls,
            vec![MessageToolCall {
                id: "call_abc".into(),
                name: "lookup".into(),
                arguments: r#"{"x":1}"#.into(),
            }]
        );

        let tool = &messages[n - 1];
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_abc"));
        assert_eq!(tool.content, payload);
    }

    #[tokio::test]
    async fn missing_call_ids_and_arguments_are_filled_in() {
        let (lookup, _) = FixedTool::new("lookup", ToolExecutionResult::for_model("data"));
        let mut registry = ToolRegistry::new();
        registry.register(lookup);

        let h = harness(
            vec![calls(&[("", "lookup", "")]), text("summary")],
            registry,
            OrchestratorSettings::default(),
        );

        h.orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();

        let requests = h.provider.requests();
        let messages = &requests[1].messages;
        let assistant = &messages[messages.len() - 2];
        assert_eq!(assistant.tool_calls[0].id, "tool_call_0");
        assert_eq!(assistant.tool_calls[0].arguments, "{}");
        assert_eq!(messages[messages.len() - 1].tool_call_id.as_deref(), Some("tool_call_0"));
    }

    #[tokio::test]
    async fn send_outputs_are_joined_without_second_call() {
        let (a, _) = FixedTool::new("a", ToolExecutionResult::send("first"));
        let (blank, _) = FixedTool::new("blank", ToolExecutionResult::send(""));
        let (b, _) = FixedTool::new("b", ToolExecutionResult::send("second"));
        let mut registry = ToolRegistry::new();
        registry.register(a);
        registry.register(blank);
        registry.register(b);

        let h = harness(
            vec![calls(&[("1", "a", "{}"), ("2", "blank", "{}"), ("3", "b", "{}")])],
            registry,
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.data, "first\n\nsecond");
        assert_eq!(h.provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn later_tools_see_earlier_updates() {
        let (remember, _) = FixedTool::new(
            "remember",
            ToolExecutionResult::send("saved").with_updates(patch_from(json!({"slots": {"note": "blue"}}))),
        );
        let mut registry = ToolRegistry::new();
        registry.register(remember);
        registry.register(ReadSlotTool);

        let h = harness(
            vec![calls(&[("1", "remember", "{}"), ("2", "read_note", "{}")])],
            registry,
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.data, "saved\n\nnote=blue");
    }

    #[tokio::test]
    async fn nameless_calls_are_skipped() {
        let (a, _) = FixedTool::new("a", ToolExecutionResult::send("only"));
        let mut registry = ToolRegistry::new();
        registry.register(a);

        let h = harness(
            vec![calls(&[("x", "", "{}"), ("y", "a", "{}")])],
            registry,
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.data, "only");
    }

    #[tokio::test]
    async fn only_nameless_calls_fall_back() {
        let h = harness(
            vec![calls(&[("x", "", "{}")])],
            ToolRegistry::new(),
            OrchestratorSettings::default(),
        );

        h.orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();

        let state = h.stored("chat-1").await;
        assert_eq!(state.metadata["last_error"], "EmptyModelResponse");
    }

    #[tokio::test]
    async fn unknown_tool_persists_user_message_only() {
        let h = harness(
            vec![calls(&[("c1", "get_weather", "{}")])],
            ToolRegistry::new(),
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("погода?"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.event, ReplyEvent::Send);
        assert_eq!(reply.data, "Запитаний інструмент зараз недоступний.");

        let state = h.stored("chat-1").await;
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].role, Role::User);
        assert!(!state.metadata.contains_key("last_error"));
    }

    #[tokio::test]
    async fn unknown_tool_reply_follows_conversation_language() {
        let h = harness(
            vec![calls(&[("c1", "get_weather", "{}")])],
            ToolRegistry::new(),
            OrchestratorSettings::default(),
        );
        let mut msg = message("weather?");
        msg.context.language = Some("en".into());

        let reply = h
            .orchestrator
            .handle_turn(&msg, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.data, "The requested tool is unavailable right now.");
    }

    #[tokio::test]
    async fn upstream_failure_falls_back_and_keeps_user_message() {
        let h = harness(
            vec![Err(ProviderError::Network("connection reset".into()))],
            ToolRegistry::new(),
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("Привіт"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            reply.data,
            "Вибачте, наразі я не можу опрацювати запит. Будь ласка, спробуйте знову трохи пізніше."
        );
        let state = h.stored("chat-1").await;
        assert_eq!(state.metadata["last_error"], "UpstreamError");
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].role, Role::User);
    }

    #[tokio::test]
    async fn blank_model_text_falls_back() {
        let h = harness(vec![text("   \n ")], ToolRegistry::new(), OrchestratorSettings::default());
        let mut msg = message("hello");
        msg.context.language = Some("en-US".into());

        let reply = h
            .orchestrator
            .handle_turn(&msg, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            reply.data,
            "Sorry, I cannot process this request right now. Please try again in a moment."
        );
        let state = h.stored("chat-1").await;
        assert_eq!(state.metadata["last_error"], "EmptyModelResponse");
    }

    #[tokio::test]
    async fn invalid_arguments_fall_back() {
        let mut registry = ToolRegistry::new();
        registry.register(StrictTool);
        let h = harness(
            vec![calls(&[("c1", "strict", r#"{"id": "not a number"}"#)])],
            registry,
            OrchestratorSettings::default(),
        );

        h.orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();

        let state = h.stored("chat-1").await;
        assert_eq!(state.metadata["last_error"], "InvalidArguments");
    }

    #[tokio::test]
    async fn tool_failure_fails_the_whole_turn() {
        let (a, _) = FixedTool::new(
            "a",
            ToolExecutionResult::send("partial").with_updates(patch_from(json!({"slots": {"seen": true}}))),
        );
        let mut registry = ToolRegistry::new();
        registry.register(a);
        registry.register(BrokenTool);
        let h = harness(
            vec![calls(&[("1", "a", "{}"), ("2", "broken", "{}")])],
            registry,
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(reply.data.starts_with("Вибачте"));
        let state = h.stored("chat-1").await;
        assert_eq!(state.metadata["last_error"], "ToolExecutionFailure");
        assert_eq!(state.slots["seen"], true);
    }

    #[tokio::test]
    async fn post_process_failure_falls_back() {
        let (lookup, _) = FixedTool::new("lookup", ToolExecutionResult::for_model("data"));
        let mut registry = ToolRegistry::new();
        registry.register(lookup);
        let h = harness(
            vec![
                calls(&[("c1", "lookup", "{}")]),
                Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "oops".into(),
                }),
            ],
            registry,
            OrchestratorSettings::default(),
        );

        h.orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();

        let state = h.stored("chat-1").await;
        assert_eq!(state.metadata["last_error"], "UpstreamError");
    }

    #[tokio::test]
    async fn repeated_tool_rounds_are_bounded() {
        let (lookup, lookup_calls) = FixedTool::new("lookup", ToolExecutionResult::for_model("data"));
        let mut registry = ToolRegistry::new();
        registry.register(lookup);
        let settings = OrchestratorSettings {
            max_tool_rounds: 2,
            ..OrchestratorSettings::default()
        };
        let h = harness(
            vec![
                calls(&[("c1", "lookup", "{}")]),
                calls(&[("c2", "lookup", "{}")]),
                calls(&[("c3", "lookup", "{}")]),
            ],
            registry,
            settings,
        );

        h.orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(lookup_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.provider.requests().len(), 3);
        let state = h.stored("chat-1").await;
        assert_eq!(state.metadata["last_error"], "ToolRoundsExceeded");
    }

    #[tokio::test]
    async fn second_round_tool_calls_are_dispatched() {
        let (lookup, _) = FixedTool::new(
            "lookup",
            ToolExecutionResult::for_model("accounts")
                .with_updates(patch_from(json!({"slots": {"accounts": [1]}}))),
        );
        let (statement, _) = FixedTool::new("statement", ToolExecutionResult::function("get_statement(accountid=1)"));
        let mut registry = ToolRegistry::new();
        registry.register(lookup);
        registry.register(statement);
        let h = harness(
            vec![
                calls(&[("c1", "lookup", "{}")]),
                calls(&[("c2", "statement", "{}")]),
            ],
            registry,
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .handle_turn(&message("виписка"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.event, ReplyEvent::Function);
        assert_eq!(reply.data, "get_statement(accountid=1)");
        assert_eq!(reply.context_updates["slots"]["accounts"], json!([1]));
    }

    #[tokio::test]
    async fn cancelled_turn_is_not_persisted() {
        let h = harness(vec![text("never")], ToolRegistry::new(), OrchestratorSettings::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = h.orchestrator.handle_turn(&message("hi"), &cancel).await;

        assert_eq!(result.unwrap_err(), TurnCancelled);
        assert!(h.provider.requests().is_empty());
        let state = h.stored("chat-1").await;
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn history_is_capped() {
        let settings = OrchestratorSettings {
            max_history_messages: 3,
            ..OrchestratorSettings::default()
        };
        let h = harness(
            vec![text("one"), text("two"), text("three")],
            ToolRegistry::new(),
            settings,
        );

        for text in ["a", "b", "c"] {
            h.orchestrator
                .handle_turn(&message(text), &CancellationToken::new())
                .await
                .unwrap();
        }

        let state = h.stored("chat-1").await;
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history[2].content, "three");
    }

    #[tokio::test]
    async fn turn_events_are_published() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let h = harness(vec![text("hello")], ToolRegistry::new(), OrchestratorSettings::default());
        let orchestrator = h.orchestrator.with_events(bus);

        orchestrator
            .handle_turn(&message("hi"), &CancellationToken::new())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::TurnCompleted { chat_id, event, tool_calls, .. } => {
                assert_eq!(chat_id, "chat-1");
                assert_eq!(event, "send");
                assert_eq!(*tool_calls, 0);
            }
            other => panic!("Expected TurnCompleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn direct_answer_uses_question_only() {
        let h = harness(vec![text(" 42 ")], ToolRegistry::new(), OrchestratorSettings::default());

        let reply = h
            .orchestrator
            .answer_direct("What is the answer?", Some("en"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.event, ReplyEvent::Send);
        assert_eq!(reply.data, "42");
        let requests = h.provider.requests();
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].messages[1].content, "What is the answer?");
        assert!(requests[0].tools.is_empty());
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn direct_answer_falls_back_in_requested_language() {
        let h = harness(
            vec![Err(ProviderError::Timeout("30s".into()))],
            ToolRegistry::new(),
            OrchestratorSettings::default(),
        );

        let reply = h
            .orchestrator
            .answer_direct("hello", Some("en"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(reply.data.starts_with("Sorry"));

        let h = harness(vec![text("")], ToolRegistry::new(), OrchestratorSettings::default());
        let reply = h
            .orchestrator
            .answer_direct("привіт", None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(reply.data.starts_with("Вибачте"));
    }

    #[tokio::test]
    async fn direct_answer_honours_cancellation() {
        let h = harness(vec![text("never")], ToolRegistry::new(), OrchestratorSettings::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = h.orchestrator.answer_direct("hi", None, &cancel).await;
        assert_eq!(result.unwrap_err(), TurnCancelled);
    }

    #[tokio::test]
    async fn zero_round_bound_still_dispatches_intents() {
        let (balance, _) = FixedTool::new("get_balance", ToolExecutionResult::function("get_balance"));
        let mut registry = ToolRegistry::new();
        registry.register(balance);
        let settings = OrchestratorSettings {
            max_tool_rounds: 0,
            ..OrchestratorSettings::default()
        };
        let h = harness(vec![calls(&[("c1", "get_balance", "")])], registry, settings);

        let reply = h
            .orchestrator
            .handle_turn(&message("баланс"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.event, ReplyEvent::Function);
        assert_eq!(reply.data, "get_balance");
    }

    /// A store whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl StateStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }

        async fn load(
            &self,
            _chat_id: &str,
            _inbound: &ChatContext,
        ) -> Result<ConversationState, MemoryError> {
            Err(MemoryError::Storage("disk on fire".into()))
        }

        async fn persist(&self, _state: &ConversationState) -> Result<(), MemoryError> {
            Err(MemoryError::Storage("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn store_failures_do_not_break_the_turn() {
        let provider = ScriptedProvider::new(vec![text("Вітаю!")]);
        let orchestrator = TurnOrchestrator::new(
            provider.clone(),
            Arc::new(BrokenStore),
            Arc::new(ToolRegistry::new()),
            OrchestratorSettings::default(),
        );
        let mut inbound = message("Hello there");
        inbound.context.language = Some("en".into());

        let reply = orchestrator
            .handle_turn(&inbound, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.event, ReplyEvent::Send);
        assert_eq!(reply.data, "Вітаю!");
        let requests = provider.requests();
        let user = requests[0].messages.last().unwrap();
        assert_eq!(user.role, Role::User);
        assert!(user.content.contains("\"language\": \"en\""), "{}", user.content);
    }

    #[test]
    fn settings_follow_config() {
        let mut config = AppConfig::default();
        config.agent.default_language = "en".into();
        config.agent.system_prompt = Some("Be brief.".into());
        config.state.max_history_messages = 7;

        let settings = OrchestratorSettings::from_config(&config);

        assert_eq!(settings.default_language, "en");
        assert_eq!(settings.system_prompt, "Be brief.");
        assert_eq!(settings.max_history_messages, 7);
        assert_eq!(settings.top_p, Some(config.provider.top_p));
        assert_eq!(OrchestratorSettings::from_config(&AppConfig::default()).system_prompt, DEFAULT_SYSTEM_PROMPT);
    }
}
