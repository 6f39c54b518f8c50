//! Tool server configuration registry.
//!
//! Administrators register, edit, toggle and delete the external MCP servers
//! the gateway may use. The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;
