//! Catalog refresh, normalization and collision tests.

use super::helpers::{GatewayHarness, calculator, harness};
use chrono::TimeDelta;
use mcp_tool_gateway::gateway::{
    adapters::memory::{ScriptedBehaviour, ScriptedServer},
    ports::RawToolDescriptor,
};
use mcp_tool_gateway::tool_registry::domain::ToolServerStatus;
use rstest::rstest;
use serde_json::{Value, json};

fn names(tools: &[mcp_tool_gateway::tool_registry::domain::ToolDefinition]) -> Vec<&str> {
    tools.iter().map(|tool| tool.name()).collect()
}

#[rstest]
#[case::list_hangs(ScriptedBehaviour::HangOnList)]
#[case::handshake_hangs(ScriptedBehaviour::HangOnHandshake)]
#[case::unreachable(ScriptedBehaviour::Unreachable)]
#[case::malformed_handshake(ScriptedBehaviour::MalformedHandshake)]
#[tokio::test(flavor = "multi_thread")]
async fn refresh_keeps_healthy_servers_when_one_fails(
    harness: GatewayHarness,
    #[case] behaviour: ScriptedBehaviour,
) {
    harness.register_stdio("alpha", calculator()).await;
    let broken = harness
        .register_stdio(
            "beta",
            ScriptedServer::new()
                .with_tool("slow_tool", "Never listed")
                .with_behaviour(behaviour),
        )
        .await;

    let snapshot = harness
        .gateway
        .refresh_catalog()
        .await
        .expect("refresh should succeed despite the failing server");

    assert_eq!(names(&snapshot.manifest()), vec!["add"]);
    assert_eq!(snapshot.failures().len(), 1);
    assert_eq!(snapshot.failures()[0].server_id, broken.id());

    let recorded = harness
        .registry
        .find_by_name("beta")
        .await
        .expect("lookup should succeed")
        .expect("server should exist");
    assert_eq!(recorded.status().status(), ToolServerStatus::Error);
    assert!(recorded.status().last_error().is_some());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn healthy_servers_are_marked_connected(harness: GatewayHarness) {
    harness.register_stdio("alpha", calculator()).await;

    harness.gateway.get_catalog().await.expect("catalog");

    let recorded = harness
        .registry
        .find_by_name("alpha")
        .await
        .expect("lookup should succeed")
        .expect("server should exist");
    assert_eq!(recorded.status().status(), ToolServerStatus::Connected);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn every_schema_in_the_catalog_is_an_object_schema(harness: GatewayHarness) {
    let schemas = [
        None,
        Some(json!({"properties": {"a": {"type": "integer"}}})),
        Some(json!({"type": "object"})),
        Some(json!("not a schema")),
        Some(json!({"type": "array", "items": {}})),
    ];
    let script = schemas
        .into_iter()
        .enumerate()
        .fold(ScriptedServer::new(), |script, (index, schema)| {
            script.with_raw_tool(RawToolDescriptor {
                name: format!("tool_{index}"),
                description: None,
                input_schema: schema,
            })
        });
    harness.register_http("schemas", script).await;

    let manifest = harness.gateway.get_catalog().await.expect("catalog");

    assert_eq!(manifest.len(), 5);
    for tool in &manifest {
        let parameters = tool.parameters();
        assert_eq!(parameters.get("type"), Some(&json!("object")), "{}", tool.name());
        assert!(
            parameters.get("properties").is_some_and(Value::is_object),
            "{} lacks properties",
            tool.name()
        );
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn blank_names_are_dropped_and_descriptions_bounded(harness: GatewayHarness) {
    let limit = harness.config.description_limit;
    let script = ScriptedServer::new()
        .with_tool("   ", "No name")
        .with_tool("verbose", &"d".repeat(limit * 2));
    harness.register_stdio("noisy", script).await;

    let manifest = harness.gateway.get_catalog().await.expect("catalog");

    assert_eq!(names(&manifest), vec!["verbose"]);
    assert_eq!(manifest[0].description().chars().count(), limit);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn later_server_wins_a_name_collision(harness: GatewayHarness) {
    harness
        .register_stdio("zeta", ScriptedServer::new().with_tool("search", "Zeta search"))
        .await;
    harness
        .register_stdio("alpha", ScriptedServer::new().with_tool("search", "Alpha search"))
        .await;

    let snapshot = harness.gateway.refresh_catalog().await.expect("refresh");
    let entry = harness
        .gateway
        .catalog()
        .find_server_for("search")
        .await
        .expect("lookup")
        .expect("search should resolve");

    assert_eq!(entry.server_name().as_str(), "zeta");
    assert_eq!(names(&snapshot.manifest()), vec!["search"]);
    assert_eq!(snapshot.shadowed().len(), 1);
    assert_eq!(snapshot.shadowed()[0].shadowed_server.as_str(), "alpha");
    assert_eq!(snapshot.shadowed()[0].winning_server.as_str(), "zeta");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn snapshot_is_reused_until_its_ttl_elapses(harness: GatewayHarness) {
    harness.register_stdio("alpha", calculator()).await;

    harness.gateway.get_catalog().await.expect("first catalog");
    harness.gateway.get_catalog().await.expect("second catalog");
    assert_eq!(harness.transport.stats().list_calls, 1);

    let ttl = i64::try_from(harness.config.catalog_ttl_secs).expect("ttl fits");
    harness.clock.advance(TimeDelta::seconds(ttl + 1));
    harness.gateway.get_catalog().await.expect("third catalog");

    assert_eq!(harness.transport.stats().list_calls, 2);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn peer_workers_share_the_published_snapshot(harness: GatewayHarness) {
    harness.register_stdio("alpha", calculator()).await;
    harness.gateway.get_catalog().await.expect("catalog");

    let peer = harness.peer_gateway();
    let manifest = peer.get_catalog().await.expect("peer catalog");

    assert_eq!(names(&manifest), vec!["add"]);
    assert_eq!(harness.transport.stats().list_calls, 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn disabled_servers_are_left_out(harness: GatewayHarness) {
    harness.register_stdio("alpha", calculator()).await;
    let idle = harness
        .register_stdio("idle", ScriptedServer::new().with_tool("nap", "Sleeps"))
        .await;
    harness.registry.disable(idle.id()).await.expect("disable");

    let manifest = harness.gateway.get_catalog().await.expect("catalog");

    assert_eq!(names(&manifest), vec!["add"]);
}
