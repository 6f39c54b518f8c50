//! Change-notification port for tool server configuration edits.

use crate::tool_registry::domain::ToolServerId;
use async_trait::async_trait;

/// Kind of configuration change an administrator made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolServerChange {
    /// A new server was registered.
    Registered,
    /// The connection descriptor was replaced.
    TransportReplaced,
    /// The server was enabled.
    Enabled,
    /// The server was disabled.
    Disabled,
    /// The server was deleted.
    Removed,
}

/// Receives notifications after configuration changes are persisted.
///
/// Listeners hold derived state (sessions, circuit records, catalogs) that
/// must not outlive the configuration it was derived from.
#[async_trait]
pub trait ToolServerChangeListener: Send + Sync {
    /// Called once per persisted change.
    async fn server_changed(&self, server_id: ToolServerId, change: ToolServerChange);
}
