//! Circuit breaker behaviour through the invocation façade.

use super::helpers::{GatewayHarness, ManualClock, UnavailableStore, calculator, harness};
use chrono::TimeDelta;
use mcp_tool_gateway::gateway::{
    adapters::memory::{ScriptedBehaviour, ScriptedServer},
    domain::{CircuitPolicy, CircuitState, InvocationErrorKind},
    ports::StateKeys,
    services::{BreakerDecision, CircuitBreaker},
};
use mcp_tool_gateway::tool_registry::domain::ToolServerId;
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn invoke_add(harness: &GatewayHarness) -> Option<InvocationErrorKind> {
    harness
        .gateway
        .invoke("add", json!({"a": 2, "b": 3}))
        .await
        .expect("invoke should not fail")
        .error_kind()
}

fn cooldown(harness: &GatewayHarness) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(harness.config.circuit_cooldown_secs).expect("fits"))
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn flaky_server_trips_and_recovers_through_one_trial(harness: GatewayHarness) {
    harness.register_stdio("flaky", calculator()).await;
    harness.gateway.get_catalog().await.expect("catalog");
    harness
        .transport
        .set_behaviour("flaky", ScriptedBehaviour::CallsFail);

    for _ in 0..harness.config.circuit_failure_threshold {
        assert_eq!(invoke_add(&harness).await, Some(InvocationErrorKind::ConnectionError));
    }
    let attempts = harness.transport.stats();

    let started = Instant::now();
    let rejected = invoke_add(&harness).await;
    let elapsed = started.elapsed();

    assert_eq!(rejected, Some(InvocationErrorKind::ServerUnavailable));
    assert!(elapsed < Duration::from_millis(10), "rejection took {elapsed:?}");
    assert_eq!(harness.transport.stats(), attempts);

    harness.clock.advance(cooldown(&harness));
    assert_eq!(invoke_add(&harness).await, Some(InvocationErrorKind::ConnectionError));
    assert_eq!(
        harness.transport.stats().tool_calls,
        attempts.tool_calls + 1
    );

    assert_eq!(
        invoke_add(&harness).await,
        Some(InvocationErrorKind::ServerUnavailable)
    );
    harness.clock.advance(TimeDelta::seconds(30));
    assert_eq!(
        invoke_add(&harness).await,
        Some(InvocationErrorKind::ServerUnavailable)
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn open_circuit_survives_a_catalog_rebuild(harness: GatewayHarness) {
    harness.register_stdio("flaky", calculator()).await;
    harness.gateway.get_catalog().await.expect("catalog");
    harness
        .transport
        .set_behaviour("flaky", ScriptedBehaviour::CallsFail);
    for _ in 0..harness.config.circuit_failure_threshold {
        invoke_add(&harness).await;
    }

    harness
        .register_stdio("notes", ScriptedServer::new().with_tool("echo", "Echoes"))
        .await;
    let manifest = harness.gateway.get_catalog().await.expect("rebuilt catalog");
    let attempts = harness.transport.stats();

    let mut names: Vec<&str> = manifest.iter().map(|tool| tool.name()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["add", "echo"]);
    assert_eq!(
        invoke_add(&harness).await,
        Some(InvocationErrorKind::ServerUnavailable)
    );
    assert_eq!(harness.transport.stats(), attempts);

    harness.clock.advance(cooldown(&harness));
    assert_eq!(invoke_add(&harness).await, Some(InvocationErrorKind::ConnectionError));
    assert_eq!(
        harness.transport.stats().tool_calls,
        attempts.tool_calls + 1
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn successful_trial_closes_the_circuit(harness: GatewayHarness) {
    let flaky = harness.register_stdio("flaky", calculator()).await;
    harness.gateway.get_catalog().await.expect("catalog");
    harness
        .transport
        .set_behaviour("flaky", ScriptedBehaviour::CallsFail);
    for _ in 0..harness.config.circuit_failure_threshold {
        invoke_add(&harness).await;
    }

    harness.clock.advance(cooldown(&harness));
    harness
        .transport
        .set_behaviour("flaky", ScriptedBehaviour::Healthy);

    assert_eq!(invoke_add(&harness).await, None);
    let record = harness
        .gateway
        .breaker()
        .status(flaky.id())
        .await
        .expect("circuit record");
    assert_eq!(record.state(), CircuitState::Closed);
    assert_eq!(record.consecutive_failures(), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn only_one_caller_claims_the_trial(harness: GatewayHarness) {
    let breaker = harness.gateway.breaker();
    let server_id = ToolServerId::new();
    for _ in 0..harness.config.circuit_failure_threshold {
        breaker.record_failure(server_id).await;
    }
    harness.clock.advance(cooldown(&harness));

    let (first, second) = tokio::join!(breaker.check(server_id), breaker.check(server_id));
    let decisions = [first, second];

    assert_eq!(
        decisions
            .iter()
            .filter(|decision| **decision == BreakerDecision::Trial)
            .count(),
        1
    );
    assert_eq!(decisions.iter().filter(|decision| decision.is_permitted()).count(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn abandoned_trials_are_reclaimed_after_a_cooldown(harness: GatewayHarness) {
    let breaker = harness.gateway.breaker();
    let server_id = ToolServerId::new();
    for _ in 0..harness.config.circuit_failure_threshold {
        breaker.record_failure(server_id).await;
    }
    harness.clock.advance(cooldown(&harness));
    assert_eq!(breaker.check(server_id).await, BreakerDecision::Trial);
    assert!(!breaker.check(server_id).await.is_permitted());

    harness.clock.advance(cooldown(&harness));

    assert_eq!(breaker.check(server_id).await, BreakerDecision::Trial);
}

#[tokio::test]
async fn unreachable_store_fails_open() {
    let breaker = CircuitBreaker::new(
        Arc::new(UnavailableStore),
        Arc::new(ManualClock::new()),
        StateKeys::new("test"),
        CircuitPolicy {
            failure_threshold: 1,
            cooldown: TimeDelta::seconds(60),
        },
    );
    let server_id = ToolServerId::new();

    breaker.record_failure(server_id).await;

    assert_eq!(breaker.check(server_id).await, BreakerDecision::FailOpen);
    assert!(breaker.status(server_id).await.is_err());
}
