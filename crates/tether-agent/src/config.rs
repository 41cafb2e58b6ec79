use crate::provider::ChatOptions;
use crate::rotation::SelectionStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tether_core::{TetherError, TetherResult};

/// Settings for the agent execution loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Static system prompt, used when no context builder is configured.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Capacity of the event queue. Emission blocks while it is full.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Upper bound on backend calls per run. `None` means unbounded.
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Model identifier passed to the provider.
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature passed to the provider.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Completion token cap passed to the provider.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            event_buffer: default_event_buffer(),
            max_turns: None,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl OrchestratorConfig {
    /// Generation options derived from this config.
    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Settings for a [`CircuitBreaker`](crate::CircuitBreaker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit, and successes needed in
    /// half-open to close it again.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Minimum time the circuit stays open before a trial is allowed.
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_breaker_timeout_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Open-state dwell time.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for a [`RotationProvider`](crate::RotationProvider).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// How the next profile is picked.
    #[serde(default)]
    pub strategy: SelectionStrategy,
    /// How long a profile is excluded after a failover-eligible failure.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl RotationConfig {
    /// Cooldown applied to a failing profile.
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TetherConfig {
    /// Agent loop settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Circuit breaker settings for failover-wrapped backends.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Profile rotation settings.
    #[serde(default)]
    pub rotation: RotationConfig,
}

impl TetherConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(input: &str) -> TetherResult<Self> {
        toml::from_str(input).map_err(|e| TetherError::Config(e.to_string()))
    }
}

fn default_event_buffer() -> usize {
    256
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    300
}
