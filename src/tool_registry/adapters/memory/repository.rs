//! In-memory repository for tool server configurations.

use crate::tool_registry::{
    domain::{ToolServerConfig, ToolServerId, ToolServerName},
    ports::{ToolServerRepository, ToolServerRepositoryError, ToolServerRepositoryResult},
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Thread-safe in-memory tool server repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryToolServerRepository {
    state: Arc<RwLock<InMemoryRepositoryState>>,
}

#[derive(Debug, Default)]
struct InMemoryRepositoryState {
    servers: HashMap<ToolServerId, ToolServerConfig>,
    name_index: BTreeMap<ToolServerName, ToolServerId>,
}

impl InMemoryRepositoryState {
    fn ordered(&self) -> Vec<ToolServerConfig> {
        self.name_index
            .values()
            .filter_map(|id| self.servers.get(id))
            .cloned()
            .collect()
    }
}

impl InMemoryToolServerRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(err: &impl std::fmt::Display) -> ToolServerRepositoryError {
    ToolServerRepositoryError::persistence(std::io::Error::other(err.to_string()))
}

#[async_trait]
impl ToolServerRepository for InMemoryToolServerRepository {
    async fn register(&self, server: &ToolServerConfig) -> ToolServerRepositoryResult<()> {
        let mut state = self.state.write().map_err(|err| lock_error(&err))?;

        if state.servers.contains_key(&server.id()) {
            return Err(ToolServerRepositoryError::DuplicateServer(server.id()));
        }

        if state.name_index.contains_key(server.name()) {
            return Err(ToolServerRepositoryError::DuplicateServerName(
                server.name().clone(),
            ));
        }

        state.name_index.insert(server.name().clone(), server.id());
        state.servers.insert(server.id(), server.clone());
        Ok(())
    }

    async fn update(&self, server: &ToolServerConfig) -> ToolServerRepositoryResult<()> {
        let mut state = self.state.write().map_err(|err| lock_error(&err))?;

        let stored_name = state
            .servers
            .get(&server.id())
            .ok_or(ToolServerRepositoryError::NotFound(server.id()))?
            .name()
            .clone();

        if *server.name() != stored_name {
            if let Some(&indexed_id) = state.name_index.get(server.name())
                && indexed_id != server.id()
            {
                return Err(ToolServerRepositoryError::DuplicateServerName(
                    server.name().clone(),
                ));
            }

            state.name_index.remove(&stored_name);
            state.name_index.insert(server.name().clone(), server.id());
        }

        state.servers.insert(server.id(), server.clone());
        Ok(())
    }

    async fn remove(&self, server_id: ToolServerId) -> ToolServerRepositoryResult<()> {
        let mut state = self.state.write().map_err(|err| lock_error(&err))?;
        let removed = state
            .servers
            .remove(&server_id)
            .ok_or(ToolServerRepositoryError::NotFound(server_id))?;
        state.name_index.remove(removed.name());
        Ok(())
    }

    async fn find_by_id(
        &self,
        server_id: ToolServerId,
    ) -> ToolServerRepositoryResult<Option<ToolServerConfig>> {
        let state = self.state.read().map_err(|err| lock_error(&err))?;
        Ok(state.servers.get(&server_id).cloned())
    }

    async fn find_by_name(
        &self,
        server_name: &ToolServerName,
    ) -> ToolServerRepositoryResult<Option<ToolServerConfig>> {
        let state = self.state.read().map_err(|err| lock_error(&err))?;
        let server = state
            .name_index
            .get(server_name)
            .and_then(|id| state.servers.get(id))
            .cloned();
        Ok(server)
    }

    async fn list_all(&self) -> ToolServerRepositoryResult<Vec<ToolServerConfig>> {
        let state = self.state.read().map_err(|err| lock_error(&err))?;
        Ok(state.ordered())
    }
}
