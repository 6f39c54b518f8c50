//! Shared world state for tool gateway BDD scenarios.

use super::helpers::{GatewayHarness, test_config};
use eyre::eyre;
use mcp_tool_gateway::gateway::{
    adapters::memory::TransportStats, domain::ToolInvocationResult,
};
use rstest::fixture;
use serde_json::json;

/// Scenario world for tool gateway behaviour tests.
pub struct GatewayWorld {
    /// In-memory gateway under test.
    pub harness: GatewayHarness,
    /// Result of the most recent `When` invocation.
    pub last_result: Option<ToolInvocationResult>,
    /// Transport counters captured once the circuit opened.
    pub stats_at_trip: Option<TransportStats>,
}

impl GatewayWorld {
    /// Calls `tool` with integer arguments `a` and `b`.
    pub fn invoke_with_operands(
        &self,
        tool: &str,
        a: usize,
        b: usize,
    ) -> Result<ToolInvocationResult, eyre::Report> {
        run_async(self.harness.gateway.invoke(tool, json!({"a": a, "b": b})))
            .map_err(|err| eyre!("gateway infrastructure failure: {err}"))
    }
}

/// Fixture providing a fresh world with short timeouts.
#[fixture]
pub fn world() -> GatewayWorld {
    GatewayWorld {
        harness: GatewayHarness::with_config(test_config()),
        last_result: None,
        stats_at_trip: None,
    }
}

/// Runs an async operation from a synchronous step.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
