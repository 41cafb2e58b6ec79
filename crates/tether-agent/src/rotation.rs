use crate::classifier::{DefaultClassifier, ErrorClassifier};
use crate::config::RotationConfig;
use crate::provider::{ChatMessage, ChatOptions, ChatResponse, Provider};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::{TetherError, TetherResult, ToolDefinition};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the next profile is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Cycle through profiles in registration order.
    #[default]
    RoundRobin,
    /// Pick the profile with the fewest requests; ties go to the earliest registered.
    LeastUsed,
    /// Pick uniformly at random.
    Random,
}

struct RotationProfile {
    name: String,
    provider: Arc<dyn Provider>,
    api_key: String,
    weight: u32,
    request_count: u64,
    cooldown_until: Option<Instant>,
}

impl RotationProfile {
    fn available(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(true, |until| now >= until)
    }

    fn selectable(&self, now: Instant, tried: &[String]) -> bool {
        self.available(now) && !tried.contains(&self.name)
    }
}

/// Status of one profile, safe to show to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStatus {
    /// Profile name.
    pub name: String,
    /// API key with everything but the last four characters hidden.
    pub masked_api_key: String,
    /// Configured weight.
    pub weight: u32,
    /// Requests dispatched to this profile so far.
    pub request_count: u64,
    /// Whether the profile is currently excluded from selection.
    pub in_cooldown: bool,
    /// Time left in cooldown, in milliseconds.
    pub cooldown_remaining_ms: u64,
}

struct RotationInner {
    profiles: Vec<RotationProfile>,
    cursor: usize,
}

/// A [`Provider`] that spreads requests over several named profiles
/// (distinct API keys or accounts) and benches a profile for a cooldown
/// period after an auth, rate-limit or billing failure.
///
/// When a request fails for one of those reasons it is re-dispatched to the
/// next available profile, so the caller only sees such an error once every
/// profile has been tried. Timeouts and unclassified errors are returned
/// immediately and never trigger a cooldown.
pub struct RotationProvider {
    strategy: SelectionStrategy,
    cooldown: Duration,
    classifier: Arc<dyn ErrorClassifier>,
    inner: Mutex<RotationInner>,
}

impl RotationProvider {
    /// Create an empty rotation.
    pub fn new(strategy: SelectionStrategy, cooldown: Duration) -> Self {
        Self {
            strategy,
            cooldown,
            classifier: Arc::new(DefaultClassifier),
            inner: Mutex::new(RotationInner {
                profiles: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Create an empty rotation from configuration.
    pub fn from_config(config: &RotationConfig) -> Self {
        Self::new(config.strategy, config.cooldown())
    }

    /// Replace the error classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Selection strategy in use.
    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Register a profile. Names must be unique.
    pub fn add_profile(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
        api_key: impl Into<String>,
        weight: u32,
    ) -> TetherResult<()> {
        let name = name.into();
        let mut inner = self.inner.lock();
        if inner.profiles.iter().any(|p| p.name == name) {
            return Err(TetherError::Config(format!(
                "Rotation profile '{name}' is already registered"
            )));
        }
        info!(profile = %name, weight, "Registered rotation profile");
        inner.profiles.push(RotationProfile {
            name,
            provider,
            api_key: api_key.into(),
            weight,
            request_count: 0,
            cooldown_until: None,
        });
        Ok(())
    }

    /// Unregister a profile. Returns whether it existed.
    pub fn remove_profile(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(idx) = inner.profiles.iter().position(|p| p.name == name) else {
            return false;
        };
        inner.profiles.remove(idx);
        if idx < inner.cursor {
            inner.cursor -= 1;
        }
        if inner.cursor >= inner.profiles.len() {
            inner.cursor = 0;
        }
        info!(profile = %name, "Removed rotation profile");
        true
    }

    /// Profile names in registration order.
    pub fn list_profiles(&self) -> Vec<String> {
        self.inner
            .lock()
            .profiles
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Status of a single profile.
    pub fn profile_status(&self, name: &str) -> Option<ProfileStatus> {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner.profiles.iter().find(|p| p.name == name).map(|p| {
            let remaining = p
                .cooldown_until
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or_default();
            ProfileStatus {
                name: p.name.clone(),
                masked_api_key: mask_api_key(&p.api_key),
                weight: p.weight,
                request_count: p.request_count,
                in_cooldown: !p.available(now),
                cooldown_remaining_ms: remaining.as_millis() as u64,
            }
        })
    }

    /// Clear the cooldown on every profile.
    pub fn reset_cooldown(&self) {
        let mut inner = self.inner.lock();
        for profile in &mut inner.profiles {
            profile.cooldown_until = None;
        }
        info!("Cleared all rotation cooldowns");
    }

    /// Pick a profile not in `tried` and count the request against it, atomically.
    fn acquire(&self, tried: &[String]) -> Option<(String, Arc<dyn Provider>)> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let idx = self.select(&mut inner, now, tried)?;
        let profile = &mut inner.profiles[idx];
        profile.request_count += 1;
        Some((profile.name.clone(), profile.provider.clone()))
    }

    fn select(&self, inner: &mut RotationInner, now: Instant, tried: &[String]) -> Option<usize> {
        let count = inner.profiles.len();
        if count == 0 {
            return None;
        }
        match self.strategy {
            SelectionStrategy::RoundRobin => {
                let start = inner.cursor % count;
                let idx = (0..count)
                    .map(|offset| (start + offset) % count)
                    .find(|&i| inner.profiles[i].selectable(now, tried))?;
                inner.cursor = (idx + 1) % count;
                Some(idx)
            }
            SelectionStrategy::LeastUsed => inner
                .profiles
                .iter()
                .enumerate()
                .filter(|(_, p)| p.selectable(now, tried))
                .min_by_key(|(_, p)| p.request_count)
                .map(|(i, _)| i),
            SelectionStrategy::Random => {
                let candidates: Vec<usize> = inner
                    .profiles
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.selectable(now, tried))
                    .map(|(i, _)| i)
                    .collect();
                candidates.choose(&mut rand::rng()).copied()
            }
        }
    }

    fn start_cooldown(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(profile) = inner.profiles.iter_mut().find(|p| p.name == name) {
            profile.cooldown_until = Some(Instant::now() + self.cooldown);
        }
    }
}

#[async_trait]
impl Provider for RotationProvider {
    fn name(&self) -> &str {
        "rotation"
    }

    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> TetherResult<ChatResponse> {
        let mut last_err: Option<TetherError> = None;
        // A profile is tried at most once per call, even if its cooldown
        // lapses before the next attempt.
        let mut tried: Vec<String> = Vec::new();

        loop {
            let Some((name, provider)) = self.acquire(&tried) else {
                return Err(last_err.unwrap_or_else(|| {
                    TetherError::NoProfileAvailable(
                        "every rotation profile is cooling down or none are registered".into(),
                    )
                }));
            };

            debug!(profile = %name, "Dispatching request to rotation profile");
            match provider.chat(cancel, messages, tools, options).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    let reason = self.classifier.classify(&e);
                    if !reason.is_failover_eligible() {
                        return Err(e);
                    }
                    self.start_cooldown(&name);
                    warn!(
                        profile = %name,
                        reason = ?reason,
                        cooldown_secs = self.cooldown.as_secs_f64(),
                        error = %e,
                        "Rotation profile failed, cooling down"
                    );
                    tried.push(name);
                    last_err = Some(e);
                }
            }
        }
    }
}

fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend that always answers with its own name, or always fails.
    struct NamedBackend {
        name: String,
        error: Option<String>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl NamedBackend {
        fn ok(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                error: None,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn failing(name: &str, error: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                error: Some(error.into()),
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn slow_failing(name: &str, error: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                error: Some(error.into()),
                delay,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for NamedBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn chat(
            &self,
            _cancel: &CancellationToken,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
            _options: &ChatOptions,
        ) -> TetherResult<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.error {
                Some(e) => Err(TetherError::Http(e.clone())),
                None => Ok(ChatResponse::text(self.name.clone())),
            }
        }
    }

    async fn call(rotation: &RotationProvider) -> TetherResult<String> {
        rotation
            .chat(&CancellationToken::new(), &[], &[], &ChatOptions::default())
            .await
            .map(|r| r.content)
    }

    fn rotation_of(strategy: SelectionStrategy, names: &[&str]) -> RotationProvider {
        let rotation = RotationProvider::new(strategy, Duration::from_secs(60));
        for name in names {
            rotation
                .add_profile(*name, NamedBackend::ok(name), format!("sk-{name}-key"), 1)
                .unwrap();
        }
        rotation
    }

    #[tokio::test]
    async fn round_robin_visits_each_profile_once() {
        let rotation = rotation_of(SelectionStrategy::RoundRobin, &["p1", "p2", "p3"]);
        assert_eq!(call(&rotation).await.unwrap(), "p1");
        assert_eq!(call(&rotation).await.unwrap(), "p2");
        assert_eq!(call(&rotation).await.unwrap(), "p3");
        assert_eq!(call(&rotation).await.unwrap(), "p1");
    }

    #[tokio::test]
    async fn least_used_prefers_fewest_requests() {
        let rotation = rotation_of(SelectionStrategy::LeastUsed, &["a", "b"]);
        // Ties go to registration order.
        assert_eq!(call(&rotation).await.unwrap(), "a");
        assert_eq!(call(&rotation).await.unwrap(), "b");
        assert_eq!(call(&rotation).await.unwrap(), "a");

        rotation.add_profile("c", NamedBackend::ok("c"), "k", 1).unwrap();
        assert_eq!(call(&rotation).await.unwrap(), "c");
        assert_eq!(call(&rotation).await.unwrap(), "b");
    }

    #[tokio::test]
    async fn random_only_picks_available_profiles() {
        let rotation = RotationProvider::new(SelectionStrategy::Random, Duration::from_secs(60));
        rotation
            .add_profile("bad", NamedBackend::failing("bad", "401 Unauthorized"), "k", 1)
            .unwrap();
        rotation.add_profile("good", NamedBackend::ok("good"), "k", 1).unwrap();

        let mut seen = HashMap::new();
        for _ in 0..20 {
            let who = call(&rotation).await.unwrap();
            *seen.entry(who).or_insert(0) += 1;
        }
        assert_eq!(seen.get("good"), Some(&20));
        assert_eq!(rotation.profile_status("bad").unwrap().request_count, 1);
    }

    #[tokio::test]
    async fn auth_failure_benches_profile_and_retries_next() {
        let rotation = RotationProvider::new(SelectionStrategy::RoundRobin, Duration::from_secs(60));
        let p1 = NamedBackend::failing("p1", "401 Unauthorized");
        rotation.add_profile("p1", p1.clone(), "sk-aaaa1111", 1).unwrap();
        rotation.add_profile("p2", NamedBackend::ok("p2"), "sk-bbbb2222", 1).unwrap();

        assert_eq!(call(&rotation).await.unwrap(), "p2");
        let status = rotation.profile_status("p1").unwrap();
        assert!(status.in_cooldown);
        assert!(status.cooldown_remaining_ms > 0);

        for _ in 0..3 {
            assert_eq!(call(&rotation).await.unwrap(), "p2");
        }
        assert_eq!(p1.calls.load(Ordering::SeqCst), 1);

        rotation.reset_cooldown();
        assert!(!rotation.profile_status("p1").unwrap().in_cooldown);
        // p1 is eligible again, and fails again.
        assert_eq!(call(&rotation).await.unwrap(), "p2");
        assert_eq!(p1.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cooldown_expires() {
        let rotation =
            RotationProvider::new(SelectionStrategy::RoundRobin, Duration::from_millis(40));
        rotation
            .add_profile("only", NamedBackend::failing("only", "429 Too Many Requests"), "k", 1)
            .unwrap();

        let err = call(&rotation).await.unwrap_err();
        assert!(err.to_string().contains("429"));

        let err = call(&rotation).await.unwrap_err();
        assert!(matches!(err, TetherError::NoProfileAvailable(_)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let err = call(&rotation).await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn zero_cooldown_tries_each_profile_once() {
        let rotation = RotationProvider::new(SelectionStrategy::RoundRobin, Duration::ZERO);
        let only = NamedBackend::failing("only", "429 Too Many Requests");
        rotation.add_profile("only", only.clone(), "k", 1).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), call(&rotation)).await;
        let err = result.expect("rotation call must return").unwrap_err();
        assert!(err.to_string().contains("429"));
        assert_eq!(only.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cooldown_shorter_than_latency_still_terminates() {
        let rotation =
            RotationProvider::new(SelectionStrategy::LeastUsed, Duration::from_millis(5));
        let a = NamedBackend::slow_failing("a", "429 Too Many Requests", Duration::from_millis(10));
        let b = NamedBackend::slow_failing("b", "401 Unauthorized", Duration::from_millis(10));
        rotation.add_profile("a", a.clone(), "k", 1).unwrap();
        rotation.add_profile("b", b.clone(), "k", 1).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), call(&rotation)).await;
        let err = result.expect("rotation call must return").unwrap_err();
        assert!(err.to_string().contains("401"));
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_does_not_cool_down() {
        let rotation = RotationProvider::new(SelectionStrategy::RoundRobin, Duration::from_secs(60));
        rotation
            .add_profile("slow", NamedBackend::failing("slow", "request timed out"), "k", 1)
            .unwrap();
        rotation.add_profile("fast", NamedBackend::ok("fast"), "k", 1).unwrap();

        let err = call(&rotation).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(!rotation.profile_status("slow").unwrap().in_cooldown);
        assert_eq!(call(&rotation).await.unwrap(), "fast");
    }

    #[tokio::test]
    async fn empty_rotation_fails_fast() {
        let rotation = RotationProvider::new(SelectionStrategy::LeastUsed, Duration::from_secs(1));
        let err = call(&rotation).await.unwrap_err();
        assert!(matches!(err, TetherError::NoProfileAvailable(_)));
    }

    #[test]
    fn profile_management() {
        let rotation = rotation_of(SelectionStrategy::RoundRobin, &["p1", "p2", "p3"]);
        assert_eq!(rotation.list_profiles(), vec!["p1", "p2", "p3"]);

        let dup = rotation.add_profile("p2", NamedBackend::ok("p2"), "k", 1);
        assert!(matches!(dup, Err(TetherError::Config(_))));

        assert!(rotation.remove_profile("p2"));
        assert!(!rotation.remove_profile("p2"));
        assert_eq!(rotation.list_profiles(), vec!["p1", "p3"]);
        assert!(rotation.profile_status("p2").is_none());

        let status = rotation.profile_status("p3").unwrap();
        assert_eq!(status.masked_api_key, "****-key");
        assert_eq!(status.weight, 1);
        assert_eq!(status.request_count, 0);
    }

    #[tokio::test]
    async fn removing_profile_keeps_round_robin_order() {
        let rotation = rotation_of(SelectionStrategy::RoundRobin, &["p1", "p2", "p3"]);
        assert_eq!(call(&rotation).await.unwrap(), "p1");
        assert!(rotation.remove_profile("p1"));
        assert_eq!(call(&rotation).await.unwrap(), "p2");
        assert_eq!(call(&rotation).await.unwrap(), "p3");
        assert_eq!(call(&rotation).await.unwrap(), "p2");
    }

    #[test]
    fn api_key_masking() {
        assert_eq!(mask_api_key("sk-live-abcdef1234"), "****1234");
        assert_eq!(mask_api_key("abc"), "****");
        assert_eq!(mask_api_key(""), "****");
    }

    #[test]
    fn strategy_serialization() {
        let json = serde_json::to_string(&SelectionStrategy::LeastUsed).unwrap();
        assert_eq!(json, "\"least_used\"");
        let back: SelectionStrategy = serde_json::from_str("\"random\"").unwrap();
        assert_eq!(back, SelectionStrategy::Random);
    }
}
