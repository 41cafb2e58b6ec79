//! Agent execution loop and provider resilience layer.
//!
//! The [`Orchestrator`] drives a conversation against a [`Provider`],
//! executing the tools the backend asks for and accepting steering and
//! follow-up messages while a run is in progress. Providers compose: a raw
//! backend can be wrapped in a [`RotationProvider`] to spread load across
//! API keys, and that in a [`FailoverProvider`] to fall back to another
//! backend, without the orchestrator knowing.
//!
//! # Main types
//!
//! - [`Orchestrator`]: The agent loop.
//! - [`AgentState`]: Transcript, tools and message queues for a run.
//! - [`AgentEvent`]: Lifecycle notifications streamed to a subscriber.
//! - [`Provider`]: Chat-completion backend contract.
//! - [`FailoverProvider`]: Primary/fallback wrapper with a circuit breaker.
//! - [`RotationProvider`]: Multi-profile wrapper with per-profile cooldown.
//! - [`CircuitBreaker`]: Closed/open/half-open health tracker.
//! - [`TetherConfig`]: TOML-loadable settings.

/// Per-backend circuit breaker.
pub mod circuit_breaker;
/// Backend error classification.
pub mod classifier;
/// Configuration structs.
pub mod config;
/// System prompt construction.
pub mod context;
/// Run lifecycle events.
pub mod event;
/// Primary/fallback provider wrapper.
pub mod failover;
/// The agent execution loop.
pub mod orchestrator;
/// Backend contract and wire-neutral message types.
pub mod provider;
/// Multi-profile provider wrapper.
pub mod rotation;
/// Per-run agent state.
pub mod state;

pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStateInfo};
pub use classifier::{DefaultClassifier, ErrorClassifier, FailoverReason};
pub use config::{CircuitBreakerConfig, OrchestratorConfig, RotationConfig, TetherConfig};
pub use context::{ContextBuilder, SkillContextBuilder, SkillEntry};
pub use event::{AgentEvent, EventKind};
pub use failover::FailoverProvider;
pub use orchestrator::{Orchestrator, SKIPPED_TOOL_CALL, USE_SKILL_TOOL};
pub use provider::{ChatMessage, ChatOptions, ChatResponse, Provider};
pub use rotation::{ProfileStatus, RotationProvider, SelectionStrategy};
pub use state::{AgentState, MessageQueue, MessageSource};
