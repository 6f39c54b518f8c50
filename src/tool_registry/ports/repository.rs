//! Repository port for tool server configuration persistence.

use crate::tool_registry::domain::{ToolServerConfig, ToolServerId, ToolServerName};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for tool server repository operations.
pub type ToolServerRepositoryResult<T> = Result<T, ToolServerRepositoryError>;

/// Persistence contract for tool server configurations.
#[async_trait]
pub trait ToolServerRepository: Send + Sync {
    /// Stores a new configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerRepositoryError::DuplicateServer`] when the ID
    /// already exists or [`ToolServerRepositoryError::DuplicateServerName`]
    /// when the name is already registered.
    async fn register(&self, server: &ToolServerConfig) -> ToolServerRepositoryResult<()>;

    /// Persists updates to an existing configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerRepositoryError::NotFound`] when the server does
    /// not exist.
    async fn update(&self, server: &ToolServerConfig) -> ToolServerRepositoryResult<()>;

    /// Deletes a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolServerRepositoryError::NotFound`] when the server does
    /// not exist.
    async fn remove(&self, server_id: ToolServerId) -> ToolServerRepositoryResult<()>;

    /// Finds a configuration by identifier.
    async fn find_by_id(
        &self,
        server_id: ToolServerId,
    ) -> ToolServerRepositoryResult<Option<ToolServerConfig>>;

    /// Finds a configuration by unique name.
    async fn find_by_name(
        &self,
        server_name: &ToolServerName,
    ) -> ToolServerRepositoryResult<Option<ToolServerConfig>>;

    /// Returns all configurations ordered by server name.
    async fn list_all(&self) -> ToolServerRepositoryResult<Vec<ToolServerConfig>>;

    /// Returns enabled configurations ordered by server name.
    async fn list_enabled(&self) -> ToolServerRepositoryResult<Vec<ToolServerConfig>> {
        let servers = self.list_all().await?;
        Ok(servers
            .into_iter()
            .filter(ToolServerConfig::is_enabled)
            .collect())
    }
}

/// Errors returned by tool server repository implementations.
#[derive(Debug, Clone, Error)]
pub enum ToolServerRepositoryError {
    /// A server with the same identifier already exists.
    #[error("duplicate tool server identifier: {0}")]
    DuplicateServer(ToolServerId),

    /// A server with the same name already exists.
    #[error("duplicate tool server name: {0}")]
    DuplicateServerName(ToolServerName),

    /// The server was not found.
    #[error("tool server not found: {0}")]
    NotFound(ToolServerId),

    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted tool server data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl ToolServerRepositoryError {
    /// Wraps persisted-data decoding or validation failures.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a persistence-layer failure.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
