//! Service layer for administrator-facing tool server configuration.

use crate::tool_registry::{
    domain::{
        ToolRegistryDomainError, ToolServerConfig, ToolServerId, ToolServerName,
        ToolServerTransport,
    },
    ports::{
        ToolServerChange, ToolServerChangeListener, ToolServerRepository,
        ToolServerRepositoryError,
    },
};
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Request payload for registering a tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterToolServerRequest {
    /// Unique server name.
    pub name: String,
    /// Connection descriptor.
    pub transport: ToolServerTransport,
    /// Whether the server starts enabled.
    pub enabled: bool,
}

impl RegisterToolServerRequest {
    /// Creates a registration request for an enabled server.
    #[must_use]
    pub fn new(name: impl Into<String>, transport: ToolServerTransport) -> Self {
        Self {
            name: name.into(),
            transport,
            enabled: true,
        }
    }

    /// Registers the server in the disabled state.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Service-level errors for registry operations.
#[derive(Debug, Error)]
pub enum ToolServerRegistryServiceError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] ToolRegistryDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] ToolServerRepositoryError),
    /// No server exists with the given identifier.
    #[error("tool server {0} not found")]
    NotFound(ToolServerId),
}

/// Result type for registry service operations.
pub type ToolServerRegistryServiceResult<T> = Result<T, ToolServerRegistryServiceError>;

/// Configuration service that keeps derived gateway state in step with edits.
///
/// Every mutating operation persists first and then notifies each registered
/// [`ToolServerChangeListener`], so no listener observes a change the
/// repository rejected.
#[derive(Clone)]
pub struct ToolServerRegistryService<R, C>
where
    R: ToolServerRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
    listeners: Vec<Arc<dyn ToolServerChangeListener>>,
}

impl<R, C> ToolServerRegistryService<R, C>
where
    R: ToolServerRepository,
    C: Clock + Send + Sync,
{
    /// Creates a registry service without listeners.
    #[must_use]
    pub const fn new(repository: Arc<R>, clock: Arc<C>) -> Self {
        Self {
            repository,
            clock,
            listeners: Vec::new(),
        }
    }

    /// Adds a listener notified after each persisted change.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ToolServerChangeListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    async fn find_server_or_error(
        &self,
        server_id: ToolServerId,
    ) -> ToolServerRegistryServiceResult<ToolServerConfig> {
        self.repository
            .find_by_id(server_id)
            .await?
            .ok_or(ToolServerRegistryServiceError::NotFound(server_id))
    }

    async fn notify(&self, server_id: ToolServerId, change: ToolServerChange) {
        for listener in &self.listeners {
            listener.server_changed(server_id, change).await;
        }
    }

    /// Registers a new tool server.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerRegistryServiceError`] when the name is invalid or
    /// persistence rejects the registration.
    pub async fn register(
        &self,
        request: RegisterToolServerRequest,
    ) -> ToolServerRegistryServiceResult<ToolServerConfig> {
        let server_name = ToolServerName::new(request.name)?;
        let mut server = ToolServerConfig::new(server_name, request.transport, &*self.clock);
        server.set_enabled(request.enabled, &*self.clock);
        self.repository.register(&server).await?;
        info!(server = %server.name(), transport = %server.transport().kind(), "tool server registered");
        self.notify(server.id(), ToolServerChange::Registered).await;
        Ok(server)
    }

    /// Enables a server so the next catalog refresh includes it.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerRegistryServiceError::NotFound`] for unknown
    /// servers or persistence errors.
    pub async fn enable(
        &self,
        server_id: ToolServerId,
    ) -> ToolServerRegistryServiceResult<ToolServerConfig> {
        self.set_enabled(server_id, true).await
    }

    /// Disables a server and invalidates everything derived from it.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerRegistryServiceError::NotFound`] for unknown
    /// servers or persistence errors.
    pub async fn disable(
        &self,
        server_id: ToolServerId,
    ) -> ToolServerRegistryServiceResult<ToolServerConfig> {
        self.set_enabled(server_id, false).await
    }

    async fn set_enabled(
        &self,
        server_id: ToolServerId,
        enabled: bool,
    ) -> ToolServerRegistryServiceResult<ToolServerConfig> {
        let mut server = self.find_server_or_error(server_id).await?;
        if !server.set_enabled(enabled, &*self.clock) {
            return Ok(server);
        }
        self.repository.update(&server).await?;
        info!(server = %server.name(), enabled, "tool server toggled");
        let change = if enabled {
            ToolServerChange::Enabled
        } else {
            ToolServerChange::Disabled
        };
        self.notify(server_id, change).await;
        Ok(server)
    }

    /// Replaces a server's connection descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerRegistryServiceError::NotFound`] for unknown
    /// servers or persistence errors.
    pub async fn update_transport(
        &self,
        server_id: ToolServerId,
        transport: ToolServerTransport,
    ) -> ToolServerRegistryServiceResult<ToolServerConfig> {
        let mut server = self.find_server_or_error(server_id).await?;
        server.replace_transport(transport, &*self.clock);
        self.repository.update(&server).await?;
        info!(server = %server.name(), "tool server transport replaced");
        self.notify(server_id, ToolServerChange::TransportReplaced)
            .await;
        Ok(server)
    }

    /// Deletes a server configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerRegistryServiceError::Repository`] when the server
    /// does not exist or persistence fails.
    pub async fn remove(&self, server_id: ToolServerId) -> ToolServerRegistryServiceResult<()> {
        self.repository.remove(server_id).await?;
        info!(server_id = %server_id, "tool server removed");
        self.notify(server_id, ToolServerChange::Removed).await;
        Ok(())
    }

    /// Lists all configured servers ordered by name.
    ///
    /// # Errors
    ///
    /// Returns persistence-layer errors from the repository.
    pub async fn list_all(&self) -> ToolServerRegistryServiceResult<Vec<ToolServerConfig>> {
        Ok(self.repository.list_all().await?)
    }

    /// Finds a configured server by name.
    ///
    /// # Errors
    ///
    /// Returns domain validation errors when the name is invalid and
    /// persistence errors from the repository.
    pub async fn find_by_name(
        &self,
        server_name: &str,
    ) -> ToolServerRegistryServiceResult<Option<ToolServerConfig>> {
        let validated_name = ToolServerName::new(server_name)?;
        Ok(self.repository.find_by_name(&validated_name).await?)
    }
}
