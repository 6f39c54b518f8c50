//! Gateway behaviour when the shared state store cannot be reached.

use super::helpers::{ManualClock, UnavailableStore, calculator, test_config};
use mcp_tool_gateway::gateway::{
    adapters::memory::InMemoryTransport, domain::ToolContent, services::ToolGateway,
};
use mcp_tool_gateway::tool_registry::{
    adapters::memory::InMemoryToolServerRepository,
    domain::ToolServerTransport,
    services::{RegisterToolServerRequest, ToolServerRegistryService},
};
use serde_json::json;
use std::sync::Arc;

type DegradedGateway =
    ToolGateway<InMemoryToolServerRepository, InMemoryTransport, UnavailableStore, ManualClock>;

async fn degraded_gateway() -> (DegradedGateway, Arc<InMemoryTransport>) {
    let clock = Arc::new(ManualClock::new());
    let repository = Arc::new(InMemoryToolServerRepository::new());
    let transport = Arc::new(InMemoryTransport::new());
    transport.set_server("calc", calculator());
    ToolServerRegistryService::new(Arc::clone(&repository), Arc::clone(&clock))
        .register(RegisterToolServerRequest::new(
            "calc",
            ToolServerTransport::streamable_http("https://calc.example/mcp")
                .expect("valid transport"),
        ))
        .await
        .expect("registration");
    let gateway = ToolGateway::new(
        repository,
        Arc::clone(&transport),
        Arc::new(UnavailableStore),
        clock,
        test_config(),
    );
    (gateway, transport)
}

#[tokio::test(flavor = "multi_thread")]
async fn catalog_falls_back_to_the_local_snapshot() {
    let (gateway, transport) = degraded_gateway().await;

    let first = gateway.get_catalog().await.expect("catalog");
    let second = gateway.get_catalog().await.expect("catalog");

    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert_eq!(transport.stats().list_calls, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn invocations_proceed_with_the_breaker_failing_open() {
    let (gateway, transport) = degraded_gateway().await;

    let result = gateway
        .invoke("add", json!({"a": 20, "b": 22}))
        .await
        .expect("invoke");

    assert!(result.is_ok());
    assert_eq!(result.content(), Some(&ToolContent::Text("42".to_owned())));
    assert_eq!(transport.stats().handshakes, 1);
}
