//! Tool server configuration aggregate root.

use super::{
    ToolServerId, ToolServerName, ToolServerStatus, ToolServerStatusSnapshot, ToolServerTransport,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};

/// A configured external tool provider.
///
/// Administrators create and edit configurations through the registry
/// service. The gateway treats them as read-only input apart from the
/// status snapshot it records after each contact with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    id: ToolServerId,
    name: ToolServerName,
    transport: ToolServerTransport,
    enabled: bool,
    status: ToolServerStatusSnapshot,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing persisted server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedToolServerData {
    /// Persisted server identifier.
    pub id: ToolServerId,
    /// Persisted server name.
    pub name: ToolServerName,
    /// Persisted connection descriptor.
    pub transport: ToolServerTransport,
    /// Persisted enabled flag.
    pub enabled: bool,
    /// Persisted status snapshot.
    pub status: ToolServerStatusSnapshot,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ToolServerConfig {
    /// Creates a new, enabled server configuration with `unknown` status.
    #[must_use]
    pub fn new(name: ToolServerName, transport: ToolServerTransport, clock: &impl Clock) -> Self {
        let timestamp = clock.utc();
        Self {
            id: ToolServerId::new(),
            name,
            transport,
            enabled: true,
            status: ToolServerStatusSnapshot::unknown(timestamp),
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Reconstructs a configuration from persistence.
    #[must_use]
    pub fn from_persisted(data: PersistedToolServerData) -> Self {
        Self {
            id: data.id,
            name: data.name,
            transport: data.transport,
            enabled: data.enabled,
            status: data.status,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the server identifier.
    #[must_use]
    pub const fn id(&self) -> ToolServerId {
        self.id
    }

    /// Returns the validated server name.
    #[must_use]
    pub const fn name(&self) -> &ToolServerName {
        &self.name
    }

    /// Returns the connection descriptor.
    #[must_use]
    pub const fn transport(&self) -> &ToolServerTransport {
        &self.transport
    }

    /// Returns whether the gateway should use this server.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the last status snapshot.
    #[must_use]
    pub const fn status(&self) -> &ToolServerStatusSnapshot {
        &self.status
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the connection-descriptor fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.transport.fingerprint()
    }

    /// Enables or disables the server.
    ///
    /// Returns `true` when the flag actually changed.
    pub fn set_enabled(&mut self, enabled: bool, clock: &impl Clock) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        if !enabled {
            self.status = ToolServerStatusSnapshot::unknown(clock.utc());
        }
        self.touch(clock);
        true
    }

    /// Replaces the connection descriptor and resets the status.
    pub fn replace_transport(&mut self, transport: ToolServerTransport, clock: &impl Clock) {
        self.transport = transport;
        self.status = ToolServerStatusSnapshot::unknown(clock.utc());
        self.touch(clock);
    }

    /// Records a successful contact with the server.
    pub fn mark_connected(&mut self, clock: &impl Clock) {
        self.status = ToolServerStatusSnapshot::connected(clock.utc());
        self.touch(clock);
    }

    /// Records a failed contact with the server.
    pub fn mark_error(&mut self, message: impl Into<String>, clock: &impl Clock) {
        self.status = ToolServerStatusSnapshot::error(clock.utc(), message);
        self.touch(clock);
    }

    /// Returns whether the recorded status differs from `status`.
    #[must_use]
    pub fn status_differs(&self, status: ToolServerStatus, last_error: Option<&str>) -> bool {
        self.status.status() != status || self.status.last_error() != last_error
    }

    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }
}
