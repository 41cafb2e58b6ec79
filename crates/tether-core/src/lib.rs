//! Core types and error definitions for the tether agent runtime.
//!
//! This crate provides the foundational types shared by the orchestrator and
//! the provider resilience layer: the unified error type, the typed
//! conversation transcript, and the tool contract.
//!
//! # Main types
//!
//! - [`TetherError`]: Unified error enum for all tether subsystems.
//! - [`TetherResult`]: Convenience alias for `Result<T, TetherError>`.
//! - [`Role`]: Message role (system, user, assistant, tool).
//! - [`ContentBlock`]: One typed block of message content.
//! - [`AgentMessage`]: A single turn-unit in a conversation.
//! - [`ToolCall`]: A backend-initiated tool invocation request.
//! - [`ToolResult`]: The output produced by a tool.
//! - [`Tool`]: Trait implemented by every executable tool.

/// Error types.
pub mod error;
/// Conversation transcript types.
pub mod message;
/// Tool contract and tool-call types.
pub mod tool;

pub use error::{TetherError, TetherResult};
pub use message::{meta, AgentMessage, ContentBlock, Role};
pub use tool::{Tool, ToolCall, ToolContext, ToolDefinition, ToolResult, ToolUpdateFn};
