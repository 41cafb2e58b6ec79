use crate::circuit_breaker::CircuitBreaker;
use crate::classifier::{DefaultClassifier, ErrorClassifier};
use crate::provider::{ChatMessage, ChatOptions, ChatResponse, Provider};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tether_core::{TetherResult, ToolDefinition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A [`Provider`] that wraps a primary backend and an optional fallback.
///
/// Each request goes to the primary. If the primary fails with an
/// auth, rate-limit or billing error and a fallback is configured, the same
/// request is sent to the fallback and its outcome is returned as-is.
/// Timeouts and unclassified errors are returned unchanged and do not count
/// against the primary's circuit breaker.
///
/// While the primary's breaker is open the fallback is used directly,
/// without first trying the primary. Once the breaker's dwell time has
/// passed, exactly one request is let through to the primary as a trial.
pub struct FailoverProvider {
    name: String,
    primary: Arc<dyn Provider>,
    fallback: RwLock<Option<Arc<dyn Provider>>>,
    classifier: Arc<dyn ErrorClassifier>,
    breaker: CircuitBreaker,
}

impl FailoverProvider {
    /// Create a failover provider with the default classifier and breaker.
    pub fn new(primary: Arc<dyn Provider>, fallback: Option<Arc<dyn Provider>>) -> Self {
        Self {
            name: format!("failover({})", primary.name()),
            primary,
            fallback: RwLock::new(fallback),
            classifier: Arc::new(DefaultClassifier),
            breaker: CircuitBreaker::default(),
        }
    }

    /// Replace the error classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the primary's circuit breaker.
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    /// Swap the fallback backend. Takes effect for the next request.
    pub fn set_fallback(&self, fallback: Option<Arc<dyn Provider>>) {
        *self.fallback.write() = fallback;
    }

    /// The primary backend.
    pub fn primary(&self) -> &Arc<dyn Provider> {
        &self.primary
    }

    /// The current fallback backend, if any.
    pub fn fallback(&self) -> Option<Arc<dyn Provider>> {
        self.fallback.read().clone()
    }

    /// The primary's circuit breaker.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl Provider for FailoverProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> TetherResult<ChatResponse> {
        let fallback = self.fallback();

        if let Some(fallback) = &fallback {
            if !self.breaker.allow_request() {
                warn!(
                    primary = %self.primary.name(),
                    fallback = %fallback.name(),
                    "Primary circuit open, routing to fallback"
                );
                return fallback.chat(cancel, messages, tools, options).await;
            }
        }

        let err = match self.primary.chat(cancel, messages, tools, options).await {
            Ok(resp) => {
                self.breaker.record_success();
                return Ok(resp);
            }
            Err(e) => e,
        };

        let reason = self.classifier.classify(&err);
        match fallback {
            Some(fallback) if reason.is_failover_eligible() => {
                self.breaker.record_failure();
                warn!(
                    primary = %self.primary.name(),
                    fallback = %fallback.name(),
                    reason = ?reason,
                    error = %err,
                    "Primary failed, failing over"
                );
                fallback.chat(cancel, messages, tools, options).await
            }
            _ => {
                debug!(
                    primary = %self.primary.name(),
                    reason = ?reason,
                    error = %err,
                    "Primary failed, not failing over"
                );
                Err(err)
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
