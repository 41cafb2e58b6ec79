use crate::config::OrchestratorConfig;
use crate::context::ContextBuilder;
use crate::event::{AgentEvent, EventBus};
use crate::provider::{ChatMessage, Provider};
use crate::state::{AgentState, MessageSource};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tether_core::{
    meta, AgentMessage, ContentBlock, Role, TetherError, TetherResult, ToolCall, ToolContext,
    ToolResult, ToolUpdateFn,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the tool whose successful calls load a skill into the context.
pub const USE_SKILL_TOOL: &str = "use_skill";

/// Result text for tool calls dropped because steering arrived mid-batch.
pub const SKIPPED_TOOL_CALL: &str = "Skipped due to queued steering message";

/// Outcome of executing one batch of tool calls.
struct ToolBatch {
    results: Vec<AgentMessage>,
    steering: Vec<AgentMessage>,
}

/// The agent execution loop.
///
/// Prompt → backend → tool calls → tool results → backend → ... until the
/// backend stops asking for tools and no steering or follow-up messages
/// are queued. Retries and failover are the provider's business; a failed
/// backend call ends the run.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    config: OrchestratorConfig,
    context_builder: Option<Arc<dyn ContextBuilder>>,
    steering_source: Option<MessageSource>,
    follow_up_source: Option<MessageSource>,
    events: EventBus,
    /// Token of the current run; replaced at the start of each run.
    cancel: Mutex<CancellationToken>,
}

impl Orchestrator {
    /// Create an orchestrator that talks to `provider`.
    pub fn new(provider: Arc<dyn Provider>, config: OrchestratorConfig) -> Self {
        let events = EventBus::new(config.event_buffer);
        Self {
            provider,
            config,
            context_builder: None,
            steering_source: None,
            follow_up_source: None,
            events,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Build the system prompt with `builder` instead of the static one in
    /// the config.
    pub fn with_context_builder(mut self, builder: Arc<dyn ContextBuilder>) -> Self {
        self.context_builder = Some(builder);
        self
    }

    /// Poll `source` for steering messages instead of the state's queue.
    pub fn with_steering_messages<F>(mut self, source: F) -> Self
    where
        F: Fn() -> Vec<AgentMessage> + Send + Sync + 'static,
    {
        self.steering_source = Some(Arc::new(source));
        self
    }

    /// Poll `source` for follow-up messages instead of the state's queue.
    pub fn with_follow_up_messages<F>(mut self, source: F) -> Self
    where
        F: Fn() -> Vec<AgentMessage> + Send + Sync + 'static,
    {
        self.follow_up_source = Some(Arc::new(source));
        self
    }

    /// The backend this orchestrator calls.
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Loop settings.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Take the event stream. There is one stream per orchestrator; later
    /// calls return `None`. Events emitted before subscribing are dropped.
    pub fn subscribe(&self) -> Option<ReceiverStream<AgentEvent>> {
        self.events.subscribe()
    }

    /// Cancel the current run and close the event stream.
    ///
    /// An in-flight backend call returns [`TetherError::Cancelled`]; a tool
    /// that is already running sees its context token cancelled but is
    /// allowed to finish. A later [`run`](Self::run) starts with a fresh
    /// token; the event stream stays closed.
    pub fn stop(&self) {
        info!("Stopping orchestrator");
        self.cancel.lock().cancel();
        self.events.close();
    }

    /// Token of the current or most recent run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Run the loop on `state`, starting with `prompts`.
    ///
    /// Returns the full transcript. On error the partial transcript is left
    /// in `state.messages`.
    pub async fn run(
        &self,
        state: &mut AgentState,
        prompts: Vec<AgentMessage>,
    ) -> TetherResult<Vec<AgentMessage>> {
        info!(
            provider = %self.provider.name(),
            prompts = prompts.len(),
            tools = state.tools.len(),
            "Starting agent run"
        );

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        self.emit(AgentEvent::AgentStart).await;
        self.emit(AgentEvent::TurnStart).await;

        let outcome = self.run_loop(state, prompts, &cancel).await;
        state.is_streaming = false;

        self.emit(AgentEvent::AgentEnd {
            messages: state.messages.clone(),
        })
        .await;

        match outcome {
            Ok(()) => {
                info!(messages = state.messages.len(), "Agent run completed");
                Ok(state.messages.clone())
            }
            Err(e) => {
                warn!(messages = state.messages.len(), error = %e, "Agent run aborted");
                Err(e)
            }
        }
    }

    async fn run_loop(
        &self,
        state: &mut AgentState,
        prompts: Vec<AgentMessage>,
        cancel: &CancellationToken,
    ) -> TetherResult<()> {
        for prompt in prompts {
            self.append_message(state, prompt).await;
        }

        let mut first_turn = true;
        let mut backend_calls: u32 = 0;
        let mut pending = self.poll_steering(state);

        loop {
            let mut has_more_tool_calls = true;

            while has_more_tool_calls || !pending.is_empty() {
                if first_turn {
                    first_turn = false;
                } else {
                    self.emit(AgentEvent::TurnStart).await;
                }

                for message in pending.drain(..) {
                    self.append_message(state, message).await;
                }

                if let Some(max_turns) = self.config.max_turns {
                    if backend_calls >= max_turns {
                        warn!(max_turns, "Agent loop reached max turns");
                        self.emit(AgentEvent::TurnEnd {
                            message: None,
                            tool_results: Vec::new(),
                            stop_reason: Some("max_turns".to_string()),
                        })
                        .await;
                        return Err(TetherError::Agent(format!(
                            "Agent loop exceeded maximum of {max_turns} turns"
                        )));
                    }
                }
                backend_calls += 1;
                debug!(turn = backend_calls, "Calling backend");

                let assistant = match self.call_backend(state, cancel).await {
                    Ok(message) => message,
                    Err(e) => {
                        error!(provider = %self.provider.name(), error = %e, "Backend call failed");
                        self.emit(AgentEvent::TurnEnd {
                            message: None,
                            tool_results: Vec::new(),
                            stop_reason: Some(e.to_string()),
                        })
                        .await;
                        return Err(e);
                    }
                };

                let tool_calls = assistant.tool_calls();
                has_more_tool_calls = !tool_calls.is_empty();

                let mut tool_results = Vec::new();
                if has_more_tool_calls {
                    let batch = self.execute_tool_calls(state, &tool_calls, cancel).await;
                    tool_results = batch.results;
                    pending = batch.steering;
                }

                let stop_reason = assistant.metadata_str(meta::STOP_REASON).map(str::to_string);
                self.emit(AgentEvent::TurnEnd {
                    message: Some(assistant),
                    tool_results,
                    stop_reason,
                })
                .await;

                if pending.is_empty() {
                    pending = self.poll_steering(state);
                }
            }

            let follow_ups = self.poll_follow_up(state);
            if follow_ups.is_empty() {
                return Ok(());
            }
            debug!(count = follow_ups.len(), "Resuming with follow-up messages");
            pending = follow_ups;
        }
    }

    /// One backend call. Appends and returns the assistant message.
    async fn call_backend(
        &self,
        state: &mut AgentState,
        cancel: &CancellationToken,
    ) -> TetherResult<AgentMessage> {
        let system_prompt = match &self.context_builder {
            Some(builder) => Some(builder.build_system_prompt(&state.loaded_skills)),
            None => self.config.system_prompt.clone(),
        };

        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
            messages.push(ChatMessage::system(prompt));
        }
        messages.extend(state.messages.iter().map(ChatMessage::from));
        let tools = state.tool_definitions();
        let options = self.config.chat_options();

        state.is_streaming = true;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TetherError::Cancelled),
            response = self.provider.chat(cancel, &messages, &tools, &options) => response,
        };
        state.is_streaming = false;
        let response = response?;

        // Only a successful reply opens an assistant message.
        self.emit(AgentEvent::MessageStart {
            role: Role::Assistant,
        })
        .await;

        let mut content = Vec::with_capacity(response.tool_calls.len() + 1);
        if !response.content.is_empty() {
            content.push(ContentBlock::text(response.content));
        }
        content.extend(response.tool_calls.into_iter().map(ContentBlock::ToolCall));

        let message = AgentMessage::new(Role::Assistant, content)
            .with_metadata(meta::STOP_REASON, Value::String(response.finish_reason));
        state.messages.push(message.clone());
        self.emit(AgentEvent::MessageEnd {
            message: message.clone(),
        })
        .await;

        Ok(message)
    }

    /// Execute `calls` in order, stopping early when steering arrives.
    async fn execute_tool_calls(
        &self,
        state: &mut AgentState,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> ToolBatch {
        let mut results = Vec::with_capacity(calls.len());

        for (idx, call) in calls.iter().enumerate() {
            let message = self.execute_tool_call(state, call, cancel).await;
            self.append_message(state, message.clone()).await;
            results.push(message);

            let steering = self.poll_steering(state);
            if steering.is_empty() {
                continue;
            }

            let remaining = &calls[idx + 1..];
            info!(
                queued = steering.len(),
                skipped = remaining.len(),
                "Steering message received, skipping remaining tool calls"
            );
            for skipped in remaining {
                let message = AgentMessage::tool_error(&skipped.id, &skipped.name, SKIPPED_TOOL_CALL);
                self.append_message(state, message.clone()).await;
                results.push(message);
            }
            return ToolBatch { results, steering };
        }

        ToolBatch {
            results,
            steering: Vec::new(),
        }
    }

    /// Execute a single call and build its tool-role message. Never fails:
    /// a missing tool or a tool error becomes an error result.
    async fn execute_tool_call(
        &self,
        state: &mut AgentState,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> AgentMessage {
        self.emit(AgentEvent::ToolExecutionStart {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
        })
        .await;

        let Some(tool) = state.find_tool(&call.name) else {
            let text = format!("Tool '{}' not found", call.name);
            warn!(tool = %call.name, call_id = %call.id, "Tool not found");
            self.emit_tool_end(call, ToolResult::text(text.clone()), true).await;
            return AgentMessage::tool_error(&call.id, &call.name, text);
        };

        info!(tool = %call.name, call_id = %call.id, "Executing tool call");
        state.pending_tool_calls.insert(call.id.clone());
        let ctx = ToolContext {
            tool_call_id: call.id.clone(),
            cancel: cancel.child_token(),
        };
        let outcome = tool
            .execute(ctx, call.arguments.clone(), self.update_callback(call))
            .await;
        state.pending_tool_calls.remove(&call.id);

        match outcome {
            Ok(result) => {
                if call.name == USE_SKILL_TOOL {
                    record_skill(state, &call.arguments);
                }
                let message = AgentMessage::tool_result(&call.id, &call.name, &result);
                self.emit_tool_end(call, result, false).await;
                message
            }
            Err(e) => {
                let text = e.to_string();
                warn!(tool = %call.name, call_id = %call.id, error = %text, "Tool execution failed");
                self.emit_tool_end(call, ToolResult::text(text.clone()), true).await;
                AgentMessage::tool_error(&call.id, &call.name, text)
            }
        }
    }

    /// Callback that forwards a tool's partial results as update events.
    fn update_callback(&self, call: &ToolCall) -> ToolUpdateFn {
        let events = self.events.clone();
        let tool_call_id = call.id.clone();
        let tool_name = call.name.clone();
        Arc::new(move |partial_result: ToolResult| {
            let events = events.clone();
            let event = AgentEvent::ToolExecutionUpdate {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                partial_result,
            };
            async move { events.emit(event).await }.boxed()
        })
    }

    async fn emit_tool_end(&self, call: &ToolCall, result: ToolResult, is_error: bool) {
        self.emit(AgentEvent::ToolExecutionEnd {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result,
            is_error,
        })
        .await;
    }

    /// Append `message` to the transcript, bracketed by message events.
    async fn append_message(&self, state: &mut AgentState, message: AgentMessage) {
        self.emit(AgentEvent::MessageStart { role: message.role }).await;
        state.messages.push(message.clone());
        self.emit(AgentEvent::MessageEnd { message }).await;
    }

    fn poll_steering(&self, state: &AgentState) -> Vec<AgentMessage> {
        match &self.steering_source {
            Some(source) => source(),
            None => state.drain_steering(),
        }
    }

    fn poll_follow_up(&self, state: &AgentState) -> Vec<AgentMessage> {
        match &self.follow_up_source {
            Some(source) => source(),
            None => state.drain_follow_up(),
        }
    }

    async fn emit(&self, event: AgentEvent) {
        self.events.emit(event).await;
    }
}

fn record_skill(state: &mut AgentState, arguments: &Value) {
    let Some(skill) = arguments
        .get("skill_name")
        .or_else(|| arguments.get("name"))
        .and_then(Value::as_str)
    else {
        return;
    };
    if !state.loaded_skills.iter().any(|s| s == skill) {
        info!(skill, "Skill loaded");
        state.loaded_skills.push(skill.to_string());
    }
}
