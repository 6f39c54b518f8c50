//! Transport and state store adapters.
//!
//! `stdio`, `sse` and `http` speak MCP over their respective transports and
//! share the JSON-RPC plumbing in `jsonrpc`; `router` picks one per server.

pub mod event_stream;
pub mod http;
pub mod jsonrpc;
pub mod memory;
pub mod postgres;
pub mod router;
pub mod sse;
pub mod stdio;
