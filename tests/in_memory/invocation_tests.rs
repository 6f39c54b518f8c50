//! Invocation façade tests: success, failure classification and session
//! handling.

use super::helpers::{GatewayHarness, calculator, harness};
use mcp_tool_gateway::gateway::{
    adapters::memory::{ScriptedBehaviour, ScriptedServer},
    domain::{InvocationErrorKind, ToolContent},
    ports::ToolCallOutcome,
};
use mcp_tool_gateway::tool_registry::domain::ToolServerTransport;
use rstest::rstest;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn add_returns_the_sum(harness: GatewayHarness) {
    harness.register_http("calc", calculator()).await;

    let result = harness
        .gateway
        .invoke("add", json!({"a": 2, "b": 3}))
        .await
        .expect("invoke should not fail");

    assert!(result.is_ok());
    assert_eq!(result.content(), Some(&ToolContent::Text("5".to_owned())));
    assert_eq!(result.error_kind(), None);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unknown_tools_are_reported_not_raised(harness: GatewayHarness) {
    harness.register_http("calc", calculator()).await;

    let result = harness
        .gateway
        .invoke("multiply", json!({}))
        .await
        .expect("invoke should not fail");

    assert!(!result.is_ok());
    assert_eq!(result.error_kind(), Some(InvocationErrorKind::UnknownTool));
    assert_eq!(harness.transport.stats().tool_calls, 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn disabling_a_cached_server_hides_its_tools(harness: GatewayHarness) {
    let calc = harness.register_http("calc", calculator()).await;
    let warmed = harness
        .gateway
        .invoke("add", json!({"a": 1, "b": 1}))
        .await
        .expect("invoke");
    assert!(warmed.is_ok());
    assert_eq!(harness.gateway.sessions().cached_sessions().await, 1);

    harness.registry.disable(calc.id()).await.expect("disable");
    let manifest = harness.gateway.get_catalog().await.expect("catalog");
    let result = harness
        .gateway
        .invoke("add", json!({"a": 2, "b": 3}))
        .await
        .expect("invoke");

    assert!(manifest.iter().all(|tool| tool.name() != "add"));
    assert_eq!(result.error_kind(), Some(InvocationErrorKind::UnknownTool));
    assert_eq!(harness.transport.stats().live_connections, 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn removed_servers_resolve_to_unknown_tool(harness: GatewayHarness) {
    let calc = harness.register_stdio("calc", calculator()).await;
    harness.gateway.get_catalog().await.expect("catalog");

    harness.registry.remove(calc.id()).await.expect("remove");
    let result = harness
        .gateway
        .invoke("add", json!({"a": 2, "b": 3}))
        .await
        .expect("invoke");

    assert_eq!(result.error_kind(), Some(InvocationErrorKind::UnknownTool));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn tool_errors_keep_the_session(harness: GatewayHarness) {
    let script = ScriptedServer::new()
        .with_tool("divide", "Divides")
        .with_handler(|_, _| ToolCallOutcome::Failed("division by zero".to_owned()));
    harness.register_stdio("math", script).await;

    for _ in 0..2 {
        let result = harness
            .gateway
            .invoke("divide", json!({"a": 1, "b": 0}))
            .await
            .expect("invoke");
        assert_eq!(result.error_kind(), Some(InvocationErrorKind::ToolExecutionError));
        assert_eq!(result.error_message(), Some("division by zero"));
    }

    assert_eq!(harness.transport.stats().handshakes, 1);
    assert_eq!(harness.transport.stats().live_connections, 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn long_error_messages_are_truncated_to_the_limit(harness: GatewayHarness) {
    let script = ScriptedServer::new()
        .with_tool("shout", "Fails loudly")
        .with_handler(|_, _| ToolCallOutcome::Failed("A".repeat(5_000)));
    harness.register_stdio("loud", script).await;

    let result = harness
        .gateway
        .invoke("shout", json!({}))
        .await
        .expect("invoke");

    let message = result.error_message().expect("failure carries a message");
    assert_eq!(message.chars().count(), harness.config.error_message_limit);
    assert_eq!(result.error_kind(), Some(InvocationErrorKind::ToolExecutionError));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn transport_failures_drop_the_session(harness: GatewayHarness) {
    harness.register_stdio("calc", calculator()).await;
    harness.gateway.get_catalog().await.expect("catalog");
    harness
        .transport
        .set_behaviour("calc", ScriptedBehaviour::CallsFail);

    let failed = harness
        .gateway
        .invoke("add", json!({"a": 2, "b": 3}))
        .await
        .expect("invoke");
    assert_eq!(failed.error_kind(), Some(InvocationErrorKind::ConnectionError));
    assert_eq!(harness.transport.stats().live_connections, 0);

    harness
        .transport
        .set_behaviour("calc", ScriptedBehaviour::Healthy);
    let recovered = harness
        .gateway
        .invoke("add", json!({"a": 2, "b": 3}))
        .await
        .expect("invoke");

    assert!(recovered.is_ok());
    assert_eq!(harness.transport.stats().handshakes, 2);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn hung_calls_time_out_and_close_the_session(harness: GatewayHarness) {
    harness.register_stdio("calc", calculator()).await;
    harness.gateway.get_catalog().await.expect("catalog");
    harness
        .transport
        .set_behaviour("calc", ScriptedBehaviour::HangOnCall);

    let result = harness
        .gateway
        .invoke("add", json!({"a": 2, "b": 3}))
        .await
        .expect("invoke");

    assert_eq!(result.error_kind(), Some(InvocationErrorKind::TimeoutError));
    assert_eq!(harness.transport.stats().live_connections, 0);
    assert_eq!(harness.gateway.sessions().cached_sessions().await, 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_handshakes_report_their_kind(harness: GatewayHarness) {
    let calc = harness.register_stdio("calc", calculator()).await;
    harness.gateway.get_catalog().await.expect("catalog");
    harness.gateway.sessions().invalidate(calc.id()).await;
    harness
        .transport
        .set_behaviour("calc", ScriptedBehaviour::MalformedHandshake);

    let result = harness
        .gateway
        .invoke("add", json!({"a": 2, "b": 3}))
        .await
        .expect("invoke");

    assert_eq!(result.error_kind(), Some(InvocationErrorKind::ProtocolError));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cancellation_abandons_the_call_without_a_failure(harness: GatewayHarness) {
    let calc = harness.register_stdio("calc", calculator()).await;
    harness.gateway.get_catalog().await.expect("catalog");
    harness
        .transport
        .set_behaviour("calc", ScriptedBehaviour::HangOnCall);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = harness
        .gateway
        .invoke_with_cancellation("add", json!({"a": 2, "b": 3}), &cancel)
        .await
        .expect("invoke");
    canceller.await.expect("canceller task");

    assert_eq!(result.error_kind(), Some(InvocationErrorKind::Cancelled));
    assert_eq!(harness.transport.stats().live_connections, 0);
    let record = harness
        .gateway
        .breaker()
        .status(calc.id())
        .await
        .expect("circuit record");
    assert_eq!(record.consecutive_failures(), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn editing_a_transport_closes_the_old_session(harness: GatewayHarness) {
    let calc = harness.register_stdio("calc", calculator()).await;
    harness
        .gateway
        .invoke("add", json!({"a": 2, "b": 3}))
        .await
        .expect("invoke");
    assert_eq!(harness.transport.stats().live_connections, 1);

    harness
        .registry
        .update_transport(
            calc.id(),
            ToolServerTransport::stdio("calc-server-v2").expect("valid transport"),
        )
        .await
        .expect("update");

    assert_eq!(harness.transport.stats().live_connections, 0);
    let result = harness
        .gateway
        .invoke("add", json!({"a": 2, "b": 3}))
        .await
        .expect("invoke");
    assert!(result.is_ok());
    assert_eq!(harness.transport.stats().handshakes, 2);
}
