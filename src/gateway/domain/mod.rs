//! Gateway domain model: invocation results, breaker records and catalog
//! snapshots.

mod catalog;
mod circuit;
mod result;

pub use catalog::{CatalogBuilder, CatalogEntry, CatalogSnapshot, ServerRefreshFailure, ShadowedTool};
pub use circuit::{CircuitAdmission, CircuitPolicy, CircuitRecord, CircuitState};
pub use result::{InvocationErrorKind, ToolContent, ToolInvocationResult};
