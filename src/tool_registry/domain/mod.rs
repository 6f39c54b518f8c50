//! Domain model for tool server configuration and tool definitions.
//!
//! The registry domain models tool server identity, transport descriptors,
//! last-known status, and the normalized tool definitions the catalog hands
//! to the agent. Infrastructure concerns remain outside this boundary.

mod error;
mod ids;
mod server;
mod status;
mod tool;
mod transport;

pub use error::{ParseToolServerStatusError, ParseTransportKindError, ToolRegistryDomainError};
pub use ids::{MAX_SERVER_NAME_LENGTH, ToolServerId, ToolServerName};
pub use server::{PersistedToolServerData, ToolServerConfig};
pub use status::{MAX_STATUS_MESSAGE_CHARS, ToolServerStatus, ToolServerStatusSnapshot};
pub use tool::{
    DEFAULT_DESCRIPTION_LIMIT, ToolDefinition, empty_object_schema, normalize_parameter_schema,
};
pub use transport::{
    Credential, HttpEndpointConfig, StdioTransportConfig, ToolServerTransport, TransportKind,
};
