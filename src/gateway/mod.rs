//! The MCP tool gateway.
//!
//! The gateway presents one flat tool catalog over every enabled tool
//! server and invokes tools on the agent loop's behalf. Sessions are cached
//! per server, failing servers are isolated by a shared circuit breaker, and
//! every failure comes back as a well-formed [`domain::ToolInvocationResult`].

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod services;
