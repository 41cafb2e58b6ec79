//! Rotation inside failover inside the orchestrator.
//!
//! The orchestrator only ever sees a `Provider`; these tests check that
//! failover-eligible errors are absorbed by the wrappers and everything
//! else surfaces unchanged.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_agent::*;
use tether_core::{AgentMessage, TetherError, TetherResult, ToolDefinition};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A mock backend that returns a sequence of results, then repeats the last.
struct MockBackend {
    name: String,
    results: Mutex<VecDeque<TetherResult<ChatResponse>>>,
    call_count: AtomicU32,
}

impl MockBackend {
    fn new(name: &str, results: Vec<TetherResult<ChatResponse>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            results: Mutex::new(results.into()),
            call_count: AtomicU32::new(0),
        })
    }

    fn always_err(name: &str, err: &str) -> Arc<Self> {
        Self::new(name, vec![Err(TetherError::Http(err.to_string()))])
    }

    fn always_ok(name: &str) -> Arc<Self> {
        Self::new(name, vec![Ok(ChatResponse::text(format!("from {name}")))])
    }

    fn calls(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockBackend {
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
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut results = self.results.lock().await;
        if results.len() > 1 {
            return results.pop_front().unwrap();
        }
        match results.front() {
            Some(Ok(resp)) => Ok(resp.clone()),
            Some(Err(TetherError::Http(msg))) => Err(TetherError::Http(msg.clone())),
            Some(Err(e)) => Err(TetherError::Provider(e.to_string())),
            None => Err(TetherError::Provider("MockBackend: no results".into())),
        }
    }
}

async fn ask(provider: Arc<dyn Provider>) -> TetherResult<Vec<AgentMessage>> {
    let orch = Orchestrator::new(provider, OrchestratorConfig::default());
    let mut state = AgentState::new();
    orch.run(&mut state, vec![AgentMessage::user("hello")]).await
}

// ── Test 1: rotation absorbs an auth failure ───────────────────────────────

#[tokio::test]
async fn rotation_routes_around_bad_key() {
    let rotation = Arc::new(RotationProvider::new(
        SelectionStrategy::RoundRobin,
        Duration::from_secs(60),
    ));
    let bad = MockBackend::always_err("bad", "401 Unauthorized: invalid api key");
    rotation.add_profile("bad", bad.clone(), "sk-bad-0001", 1).unwrap();
    rotation
        .add_profile("good", MockBackend::always_ok("good"), "sk-good-0002", 1)
        .unwrap();

    let fallback = MockBackend::always_ok("fallback");
    let failover = Arc::new(FailoverProvider::new(rotation.clone(), Some(fallback.clone())));

    let transcript = ask(failover.clone()).await.unwrap();
    assert_eq!(transcript.last().unwrap().text(), "from good");

    let status = rotation.profile_status("bad").unwrap();
    assert!(status.in_cooldown);
    assert_eq!(status.masked_api_key, "****0001");
    assert_eq!(fallback.calls(), 0);
    assert_eq!(failover.circuit_breaker().state(), CircuitState::Closed);

    // The benched profile is not retried on the next run.
    ask(failover).await.unwrap();
    assert_eq!(bad.calls(), 1);
}

// ── Test 2: exhausted rotation falls over to the fallback ──────────────────

#[tokio::test]
async fn exhausted_rotation_fails_over() {
    let rotation = Arc::new(RotationProvider::new(
        SelectionStrategy::LeastUsed,
        Duration::from_secs(60),
    ));
    for name in ["k1", "k2"] {
        rotation
            .add_profile(name, MockBackend::always_err(name, "429 Too Many Requests"), "key", 1)
            .unwrap();
    }
    let fallback = MockBackend::always_ok("fallback");
    let failover = Arc::new(FailoverProvider::new(rotation.clone(), Some(fallback.clone())));

    let transcript = ask(failover.clone()).await.unwrap();
    assert_eq!(transcript.last().unwrap().text(), "from fallback");
    assert_eq!(failover.circuit_breaker().state_info().failures, 1);

    // With every profile cooling down the rotation fails fast.
    let err = ask(Arc::new(FailoverProvider::new(rotation.clone(), None)))
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::NoProfileAvailable(_)));

    rotation.reset_cooldown();
    assert!(!rotation.profile_status("k1").unwrap().in_cooldown);
}

// ── Test 3: timeouts are never masked ──────────────────────────────────────

#[tokio::test]
async fn timeout_reaches_the_caller() {
    let rotation = Arc::new(RotationProvider::new(
        SelectionStrategy::RoundRobin,
        Duration::from_secs(60),
    ));
    rotation
        .add_profile("slow", MockBackend::always_err("slow", "request timed out"), "k", 1)
        .unwrap();
    let fallback = MockBackend::always_ok("fallback");
    let failover = Arc::new(FailoverProvider::new(rotation.clone(), Some(fallback.clone())));

    let err = ask(failover.clone()).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert_eq!(fallback.calls(), 0);
    assert!(!rotation.profile_status("slow").unwrap().in_cooldown);
    assert_eq!(failover.circuit_breaker().state_info().failures, 0);
}

// ── Test 4: open breaker sends traffic straight to the fallback ────────────

#[tokio::test]
async fn tripped_breaker_skips_primary() {
    let primary = MockBackend::always_err("primary", "402 Payment Required");
    let fallback = MockBackend::always_ok("fallback");
    let breaker = CircuitBreaker::from_config(&CircuitBreakerConfig {
        failure_threshold: 2,
        timeout_secs: 60,
    });
    let failover = Arc::new(
        FailoverProvider::new(primary.clone(), Some(fallback.clone())).with_circuit_breaker(breaker),
    );

    for _ in 0..4 {
        let transcript = ask(failover.clone()).await.unwrap();
        assert_eq!(transcript.last().unwrap().text(), "from fallback");
    }
    assert_eq!(primary.calls(), 2);
    assert_eq!(fallback.calls(), 4);
    assert!(failover.circuit_breaker().state_info().is_open);
}

// ── Test 5: concurrent callers share one rotation safely ───────────────────

#[tokio::test]
async fn concurrent_requests_spread_across_profiles() {
    let rotation = Arc::new(RotationProvider::new(
        SelectionStrategy::RoundRobin,
        Duration::from_secs(60),
    ));
    let backends: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| MockBackend::always_ok(name))
        .collect();
    for backend in &backends {
        rotation
            .add_profile(backend.name.clone(), backend.clone(), "key", 1)
            .unwrap();
    }

    let handles: Vec<_> = (0..30)
        .map(|_| {
            let rotation = rotation.clone();
            tokio::spawn(async move { ask(rotation).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for backend in &backends {
        assert_eq!(backend.calls(), 10);
        assert_eq!(rotation.profile_status(&backend.name).unwrap().request_count, 10);
    }
}

// ── Test 6: the whole stack from one TOML document ─────────────────────────

#[tokio::test]
async fn stack_from_config() {
    let config = TetherConfig::from_toml_str(
        r#"
        [orchestrator]
        system_prompt = "You are terse."
        max_turns = 4

        [circuit_breaker]
        failure_threshold = 1
        timeout_secs = 30

        [rotation]
        strategy = "random"
        cooldown_secs = 1
        "#,
    )
    .unwrap();

    let rotation = Arc::new(RotationProvider::from_config(&config.rotation));
    assert_eq!(rotation.strategy(), SelectionStrategy::Random);
    rotation
        .add_profile("only", MockBackend::always_ok("only"), "sk-only-9999", 1)
        .unwrap();

    let breaker = CircuitBreaker::from_config(&config.circuit_breaker);
    assert_eq!(breaker.failure_threshold(), 1);
    let failover = Arc::new(FailoverProvider::new(rotation, None).with_circuit_breaker(breaker));
    assert_eq!(failover.name(), "failover(rotation)");

    let orch = Orchestrator::new(failover, config.orchestrator.clone());
    assert_eq!(orch.config().max_turns, Some(4));
    let mut state = AgentState::new();
    let transcript = orch
        .run(&mut state, vec![AgentMessage::user("hi")])
        .await
        .unwrap();
    assert_eq!(transcript.last().unwrap().text(), "from only");
}
