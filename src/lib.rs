//! MCP tool gateway: discovery, caching and invocation of tools exposed by
//! external Model Context Protocol servers.
//!
//! The crate sits between an LLM agent loop and an unreliable, changing set
//! of tool servers. It keeps one cached session per server, isolates failing
//! servers behind a circuit breaker shared across workers, and turns every
//! expected failure into a well-formed result the agent can reason about.
//!
//! # Architecture
//!
//! The crate follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports (transports, stores,
//!   persistence)
//!
//! # Modules
//!
//! - [`tool_registry`]: Tool server configuration and its persistence
//! - [`gateway`]: Transports, session cache, catalog index, circuit breaker
//!   and the invocation façade
//! - [`truncate`]: Character-bounded truncation for outbound text

pub mod gateway;
pub mod tool_registry;
pub mod truncate;
