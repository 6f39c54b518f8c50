//! In-memory adapters for single-worker deployments and tests.

mod store;
mod transport;

pub use store::InMemoryStateStore;
pub use transport::{
    InMemoryTransport, ScriptedBehaviour, ScriptedServer, ToolHandler, TransportStats,
};
