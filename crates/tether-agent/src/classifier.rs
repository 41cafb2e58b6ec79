use serde::{Deserialize, Serialize};
use tether_core::TetherError;

/// Category of a backend failure, used to decide whether to route around
/// the failing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    /// Credentials rejected (401/403, invalid key).
    Auth,
    /// Too many requests (429).
    RateLimit,
    /// Account out of credit or quota (402).
    Billing,
    /// The request did not complete in time.
    Timeout,
    /// Anything else.
    Unknown,
}

impl FailoverReason {
    /// Auth, rate-limit and billing failures are tied to one backend or
    /// account, so another one may succeed. Timeouts and unknown errors are
    /// surfaced unchanged.
    pub fn is_failover_eligible(self) -> bool {
        matches!(
            self,
            FailoverReason::Auth | FailoverReason::RateLimit | FailoverReason::Billing
        )
    }
}

/// Maps a raw backend error to a [`FailoverReason`].
pub trait ErrorClassifier: Send + Sync {
    /// Classifies `err`.
    fn classify(&self, err: &TetherError) -> FailoverReason;
}

/// Pattern-based classifier for the error strings common LLM APIs return.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

const AUTH_PATTERNS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "invalid_api_key",
    "authentication",
    "permission denied",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "429",
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "overloaded",
];

const BILLING_PATTERNS: &[&str] = &[
    "402",
    "billing",
    "payment required",
    "quota",
    "insufficient credits",
    "insufficient_quota",
    "credit balance",
];

const TIMEOUT_PATTERNS: &[&str] = &[
    "408",
    "504",
    "timeout",
    "timed out",
    "deadline exceeded",
];

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, err: &TetherError) -> FailoverReason {
        if matches!(err, TetherError::Cancelled) {
            return FailoverReason::Timeout;
        }

        let lower = err.to_string().to_lowercase();
        let matches_any = |patterns: &[&str]| patterns.iter().any(|p| contains_pattern(&lower, p));

        // Billing before rate limit: "quota exceeded" responses often arrive as 429.
        if matches_any(BILLING_PATTERNS) {
            FailoverReason::Billing
        } else if matches_any(RATE_LIMIT_PATTERNS) {
            FailoverReason::RateLimit
        } else if matches_any(AUTH_PATTERNS) {
            FailoverReason::Auth
        } else if matches_any(TIMEOUT_PATTERNS) {
            FailoverReason::Timeout
        } else {
            FailoverReason::Unknown
        }
    }
}

/// Status codes only match as whole numbers, so "4290 tokens" is not a 429.
fn contains_pattern(haystack: &str, pattern: &str) -> bool {
    if !pattern.bytes().all(|b| b.is_ascii_digit()) {
        return haystack.contains(pattern);
    }
    let bytes = haystack.as_bytes();
    haystack.match_indices(pattern).any(|(start, _)| {
        let end = start + pattern.len();
        let before = start.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(end).copied();
        !before.is_some_and(|b| b.is_ascii_digit()) && !after.is_some_and(|b| b.is_ascii_digit())
    })
}
