use crate::tool::{ToolCall, ToolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Well-known keys of [`AgentMessage::metadata`].
pub mod meta {
    /// Id of the tool call a `tool` message answers.
    pub const TOOL_CALL_ID: &str = "tool_call_id";
    /// Name of the tool a `tool` message answers.
    pub const TOOL_NAME: &str = "tool_name";
    /// Error text when a tool lookup or execution failed.
    pub const ERROR: &str = "error";
    /// Finish reason reported by the backend for an assistant message.
    pub const STOP_REASON: &str = "stop_reason";
}

/// The role of the participant that authored an [`AgentMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system-level instruction or prompt.
    System,
    /// A human end-user.
    User,
    /// The model backend.
    Assistant,
    /// Output produced by a tool invocation.
    Tool,
}

/// One typed block of message content.
///
/// Only assistant messages carry [`ContentBlock::ToolCall`]; only tool
/// messages carry [`ContentBlock::ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
    },
    /// A reference to an image.
    Image {
        /// URL or data URI of the image.
        url: String,
        /// MIME type, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// A tool invocation requested by the backend.
    ToolCall(ToolCall),
    /// The textual outcome of a tool invocation.
    ToolResult {
        /// Id of the [`ToolCall`] this block answers.
        tool_call_id: String,
        /// Tool output, or the error text when `is_error` is set.
        content: String,
        /// Whether the tool failed.
        is_error: bool,
    },
}

impl ContentBlock {
    /// Creates a text block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Creates an image block.
    pub fn image(url: impl Into<String>) -> Self {
        ContentBlock::Image {
            url: url.into(),
            mime_type: None,
        }
    }
}

/// A single turn-unit in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The role of the message author.
    pub role: Role,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary key-value metadata attached to the message. See [`meta`].
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentMessage {
    /// Creates a new message with the given role and content blocks.
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Creates a text message with [`Role::User`].
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    /// Creates a text message with [`Role::Assistant`].
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
    }

    /// Creates a text message with [`Role::System`].
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentBlock::text(text)])
    }

    /// Creates the [`Role::Tool`] message answering a successful tool call.
    ///
    /// Text blocks of the result are folded into a single
    /// [`ContentBlock::ToolResult`]; images are kept as separate blocks.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: &ToolResult,
    ) -> Self {
        let tool_call_id = tool_call_id.into();
        let mut content = vec![ContentBlock::ToolResult {
            tool_call_id: tool_call_id.clone(),
            content: result.text_content(),
            is_error: false,
        }];
        content.extend(
            result
                .content
                .iter()
                .filter(|b| matches!(b, ContentBlock::Image { .. }))
                .cloned(),
        );
        Self::new(Role::Tool, content).with_tool_ids(tool_call_id, tool_name)
    }

    /// Creates the [`Role::Tool`] message for a tool call that failed.
    ///
    /// The content is replaced by the error text, which is also recorded
    /// under the [`meta::ERROR`] key.
    pub fn tool_error(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let tool_call_id = tool_call_id.into();
        let error = error.into();
        let msg = Self::new(
            Role::Tool,
            vec![ContentBlock::ToolResult {
                tool_call_id: tool_call_id.clone(),
                content: error.clone(),
                is_error: true,
            }],
        );
        msg.with_tool_ids(tool_call_id, tool_name)
            .with_metadata(meta::ERROR, serde_json::Value::String(error))
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    fn with_tool_ids(self, tool_call_id: String, tool_name: impl Into<String>) -> Self {
        self.with_metadata(meta::TOOL_CALL_ID, serde_json::Value::String(tool_call_id))
            .with_metadata(meta::TOOL_NAME, serde_json::Value::String(tool_name.into()))
    }

    /// Returns a metadata entry as a string slice, if it is a JSON string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Concatenated text of all text and tool-result blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolResult { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// URLs of all image blocks, in order.
    pub fn images(&self) -> Vec<String> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Image { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls requested by this message, in order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether this message requests at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolCall(_)))
    }

    /// Whether this is a tool message reporting a failure.
    pub fn is_error(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { is_error: true, .. }))
    }
}
