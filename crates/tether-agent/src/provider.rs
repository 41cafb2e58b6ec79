use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tether_core::{meta, AgentMessage, Role, TetherResult, ToolCall, ToolDefinition};
use tokio_util::sync::CancellationToken;

/// A message in the wire-neutral shape every backend consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Image references attached to the message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Id of the tool call a tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool a tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    /// A plain system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }
}

impl From<&AgentMessage> for ChatMessage {
    fn from(msg: &AgentMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.text(),
            images: msg.images(),
            tool_calls: msg.tool_calls(),
            tool_call_id: msg.metadata_str(meta::TOOL_CALL_ID).map(str::to_string),
            tool_name: msg.metadata_str(meta::TOOL_NAME).map(str::to_string),
        }
    }
}

/// A completed backend reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Assistant text; may be empty when only tool calls were produced.
    pub content: String,
    /// Tool calls requested by the backend, in order.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Backend-reported finish reason (`stop`, `tool_calls`, `length`, ...).
    #[serde(default)]
    pub finish_reason: String,
}

impl ChatResponse {
    /// A text-only reply finishing with `stop`.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
        }
    }

    /// A reply requesting tool calls.
    pub fn tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: "tool_calls".to_string(),
        }
    }
}

/// Per-request generation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Model identifier override.
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Completion token cap.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// A model backend.
///
/// Raw backends, [`FailoverProvider`](crate::FailoverProvider) and
/// [`RotationProvider`](crate::RotationProvider) all implement this trait,
/// so they compose transparently and the orchestrator never needs to know
/// which one it was given.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs and status reports.
    fn name(&self) -> &str;

    /// Performs one chat completion. Implementations should honour `cancel`.
    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> TetherResult<ChatResponse>;
}
