use crate::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// The backend is considered down.
    Open,
    /// Trial successes are being counted before closing again.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase state name.
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of a breaker for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStateInfo {
    /// Current state.
    pub state: CircuitState,
    /// Failures counted since the last reset.
    pub failures: u32,
    /// Successes counted while half-open.
    pub success_count: u32,
    /// Shorthand for `state == Open`.
    pub is_open: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    /// When the outstanding trial request of an open breaker was granted.
    trial_started: Option<Instant>,
}

impl BreakerInner {
    fn dwell_elapsed(&self, timeout: Duration) -> bool {
        self.last_failure.map_or(true, |t| t.elapsed() >= timeout)
    }

    fn trial_in_flight(&self, timeout: Duration) -> bool {
        self.trial_started.is_some_and(|t| t.elapsed() < timeout)
    }
}

/// Health tracker for a single backend.
///
/// ```text
/// Closed   --failures >= threshold-->             Open
/// Open     --first success after dwell timeout--> HalfOpen
/// HalfOpen --successes >= threshold-->            Closed
/// HalfOpen --any failure-->                       Open
/// ```
///
/// Every transition happens under one lock. Once the dwell timeout of an
/// open breaker has elapsed, [`allow_request`](Self::allow_request) hands
/// out a single trial permit; concurrent callers are refused until that
/// trial's outcome is recorded. A permit whose outcome is never recorded
/// lapses after another dwell timeout.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker. A threshold of zero is treated as one.
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                success_count: 0,
                last_failure: None,
                trial_started: None,
            }),
        }
    }

    /// Creates a breaker from configuration.
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.timeout())
    }

    /// Whether a request may be sent to the backend right now.
    ///
    /// An open breaker refuses until its dwell timeout has elapsed. After
    /// that, the first caller claims the trial permit and gets `true`; the
    /// rest get `false` until the trial's outcome is recorded.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if !inner.dwell_elapsed(self.timeout) || inner.trial_in_flight(self.timeout) {
                    return false;
                }
                inner.trial_started = Some(Instant::now());
                true
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.trial_started = None;
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {
                // The first post-dwell success only starts the trial.
                if inner.dwell_elapsed(self.timeout) {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    info!("Circuit breaker half-open");
                }
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.failure_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.success_count = 0;
                    inner.last_failure = None;
                    info!("Circuit breaker closed");
                }
            }
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.trial_started = None;
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(Instant::now());
                    warn!(
                        failures = inner.failures,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::Open => {
                inner.failures += 1;
                inner.last_failure = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                inner.failures += 1;
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.last_failure = Some(Instant::now());
                warn!("Circuit breaker re-opened from half-open");
            }
        }
    }

    /// Forces the breaker closed with all counters cleared.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        inner.trial_started = None;
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot for observability.
    pub fn state_info(&self) -> CircuitStateInfo {
        let inner = self.inner.lock();
        CircuitStateInfo {
            state: inner.state,
            failures: inner.failures,
            success_count: inner.success_count,
            is_open: inner.state == CircuitState::Open,
        }
    }

    /// Configured failure threshold.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default())
    }
}
