//! Port contracts for transports and shared state.

mod store;
mod transport;

#[cfg(test)]
pub use transport::MockMcpConnection;
pub use store::{SharedStateStore, StateKeys, StateStoreError, StateStoreResult, VersionedValue};
pub use transport::{
    ClientInfo, McpConnection, McpSession, McpTransportAdapter, RawToolDescriptor,
    ToolCallOutcome, ToolsPage, TransportError, TransportResult, list_all_tools,
};
