//! When steps for tool gateway BDD scenarios.

use super::world::{GatewayWorld, run_async};
use chrono::TimeDelta;
use eyre::{WrapErr, eyre};
use rstest_bdd_macros::when;

#[when(r#"the agent invokes "{tool}" with a = {a:usize} and b = {b:usize}"#)]
fn agent_invokes(
    world: &mut GatewayWorld,
    tool: String,
    a: usize,
    b: usize,
) -> Result<(), eyre::Report> {
    world.last_result = Some(world.invoke_with_operands(&tool, a, b)?);
    Ok(())
}

#[when(r#"the agent invokes "{tool}" {count:usize} times"#)]
fn agent_invokes_repeatedly(
    world: &mut GatewayWorld,
    tool: String,
    count: usize,
) -> Result<(), eyre::Report> {
    for _ in 0..count {
        world.last_result = Some(world.invoke_with_operands(&tool, 1, 1)?);
    }
    world.stats_at_trip = Some(world.harness.transport.stats());
    Ok(())
}

#[when(r#"the server "{name}" is disabled"#)]
fn server_is_disabled(world: &mut GatewayWorld, name: String) -> Result<(), eyre::Report> {
    let server = run_async(world.harness.registry.find_by_name(&name))
        .wrap_err("server lookup should succeed")?
        .ok_or_else(|| eyre!("server {name} should be registered"))?;
    run_async(world.harness.registry.disable(server.id())).wrap_err("disable should succeed")?;
    Ok(())
}

#[when("the circuit cooldown elapses")]
fn cooldown_elapses(world: &mut GatewayWorld) -> Result<(), eyre::Report> {
    let seconds = i64::try_from(world.harness.config.circuit_cooldown_secs)
        .wrap_err("cooldown should fit in i64")?;
    world.harness.clock.advance(TimeDelta::seconds(seconds));
    Ok(())
}
