use crate::message::ContentBlock;
use crate::TetherResult;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A request from the backend to invoke a specific tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier assigned by the backend for this tool call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

/// Output produced by a tool, either final or partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Ordered output blocks (text and images).
    pub content: Vec<ContentBlock>,
    /// Free-form structured details for observers.
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    /// Creates a result holding a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            details: HashMap::new(),
        }
    }

    /// Attaches a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Text blocks joined by newlines.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Name, description and JSON-Schema parameters of a tool, as advertised
/// to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name; must be unique within a tool set.
    pub name: String,
    /// Human-readable description for the model.
    pub description: String,
    /// JSON-Schema object describing the arguments.
    pub parameters: serde_json::Value,
}

/// Per-call execution context handed to [`Tool::execute`].
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Id of the tool call being executed.
    pub tool_call_id: String,
    /// Cancellation token of the enclosing run.
    pub cancel: CancellationToken,
}

/// Callback through which a tool streams partial results.
///
/// The returned future resolves once the update has been queued for
/// observers, so a slow observer applies backpressure to the tool.
pub type ToolUpdateFn = Arc<dyn Fn(ToolResult) -> BoxFuture<'static, ()> + Send + Sync>;

/// Trait that every executable tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Description shown to the backend.
    fn description(&self) -> &str;

    /// JSON-Schema of the accepted arguments.
    fn parameters(&self) -> serde_json::Value;

    /// The definition advertised to the backend.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    /// Runs the tool. Partial output may be reported through `on_update`
    /// any number of times before the final result is returned.
    async fn execute(
        &self,
        ctx: ToolContext,
        arguments: serde_json::Value,
        on_update: ToolUpdateFn,
    ) -> TetherResult<ToolResult>;
}
