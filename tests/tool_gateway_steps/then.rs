//! Then steps for tool gateway BDD scenarios.

use super::world::{GatewayWorld, run_async};
use eyre::{WrapErr, eyre};
use mcp_tool_gateway::gateway::domain::{InvocationErrorKind, ToolContent};
use rstest_bdd_macros::then;

#[then(r#"the invocation succeeds with content "{content}""#)]
fn invocation_succeeds(world: &GatewayWorld, content: String) -> Result<(), eyre::Report> {
    let result = world
        .last_result
        .as_ref()
        .ok_or_else(|| eyre!("no invocation recorded"))?;
    if !result.is_ok() {
        return Err(eyre!("expected success, got {result:?}"));
    }
    if result.content() != Some(&ToolContent::Text(content.clone())) {
        return Err(eyre!("expected content '{content}', got {:?}", result.content()));
    }
    Ok(())
}

#[then(r#"the catalog does not list "{tool}""#)]
fn catalog_omits(world: &GatewayWorld, tool: String) -> Result<(), eyre::Report> {
    let manifest =
        run_async(world.harness.gateway.get_catalog()).wrap_err("catalog should build")?;
    if manifest.iter().any(|listed| listed.name() == tool) {
        return Err(eyre!("catalog still lists '{tool}'"));
    }
    Ok(())
}

#[then(r#"invoking "{tool}" fails with "{kind}""#)]
fn invoking_fails_with(
    world: &mut GatewayWorld,
    tool: String,
    kind: String,
) -> Result<(), eyre::Report> {
    let result = world.invoke_with_operands(&tool, 2, 3)?;
    let observed = result.error_kind().map(InvocationErrorKind::as_str);
    if observed != Some(kind.as_str()) {
        return Err(eyre!("expected error kind '{kind}', got {observed:?}"));
    }
    world.last_result = Some(result);
    Ok(())
}

#[then("no call reached the server after the circuit opened")]
fn no_call_after_trip(world: &GatewayWorld) -> Result<(), eyre::Report> {
    let captured = world
        .stats_at_trip
        .ok_or_else(|| eyre!("transport counters were not captured"))?;
    let current = world.harness.transport.stats();
    if current != captured {
        return Err(eyre!("transport was used after the trip: {captured:?} -> {current:?}"));
    }
    Ok(())
}
