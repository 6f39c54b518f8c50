//! Gateway services: session cache, circuit breaker, catalog index and the
//! invocation façade that ties them together.

mod catalog;
mod circuit_breaker;
mod gateway;
mod session_cache;

pub use catalog::{CatalogError, CatalogIndex, CatalogResult, MAX_TOOL_PAGES};
pub use circuit_breaker::{BreakerDecision, CircuitBreaker};
pub use gateway::{GatewayError, GatewayResult, ToolGateway};
pub use session_cache::{SessionCache, SessionCacheSettings};
