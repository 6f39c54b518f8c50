//! Tool catalog index.
//!
//! A refresh lists every enabled server concurrently and folds the results,
//! in ascending server-name order, into one [`CatalogSnapshot`]. Snapshots
//! are published to the shared store with their own TTL and memoized per
//! process by store version, so repeated lookups within one agent turn cost
//! a single store read.

use super::circuit_breaker::{BreakerDecision, CircuitBreaker};
use super::session_cache::SessionCache;
use crate::gateway::config::{GatewayConfig, time_delta};
use crate::gateway::domain::{CatalogBuilder, CatalogEntry, CatalogSnapshot};
use crate::gateway::ports::{
    McpTransportAdapter, RawToolDescriptor, SharedStateStore, StateKeys, TransportError,
    list_all_tools,
};
use crate::tool_registry::domain::{
    MAX_STATUS_MESSAGE_CHARS, ToolDefinition, ToolServerConfig, ToolServerStatus,
};
use crate::tool_registry::ports::{ToolServerRepository, ToolServerRepositoryError};
use crate::truncate::truncate_chars;
use futures_util::future::join_all;
use mockable::Clock;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Upper bound on `tools/list` pages fetched from one server.
pub const MAX_TOOL_PAGES: usize = 100;

/// Errors that prevent the catalog from being built at all.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The server registry could not be read.
    #[error("tool server registry unavailable: {0}")]
    Registry(#[from] ToolServerRepositoryError),
}

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

enum ServerListing {
    Listed(Vec<ToolDefinition>),
    Carried(Vec<ToolDefinition>),
    Failed(String),
    Skipped(String),
}

struct Memo {
    version: Option<u64>,
    snapshot: Arc<CatalogSnapshot>,
}

/// Settings the index reads from [`GatewayConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CatalogSettings {
    ttl: Duration,
    list_timeout: Duration,
    description_limit: usize,
    error_message_limit: usize,
}

/// Flat name-to-server index over every enabled tool server.
pub struct CatalogIndex<R, T, S, C>
where
    R: ToolServerRepository,
    T: McpTransportAdapter,
    S: SharedStateStore,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    sessions: Arc<SessionCache<T, S, C>>,
    breaker: Arc<CircuitBreaker<S, C>>,
    store: Arc<S>,
    clock: Arc<C>,
    key: String,
    settings: CatalogSettings,
    memo: RwLock<Option<Memo>>,
    previous: RwLock<Option<Arc<CatalogSnapshot>>>,
    refresh_lock: Mutex<()>,
}

impl<R, T, S, C> CatalogIndex<R, T, S, C>
where
    R: ToolServerRepository,
    T: McpTransportAdapter,
    S: SharedStateStore,
    C: Clock + Send + Sync,
{
    /// Creates an index with no snapshot.
    #[must_use]
    pub fn new(
        repository: Arc<R>,
        sessions: Arc<SessionCache<T, S, C>>,
        breaker: Arc<CircuitBreaker<S, C>>,
        store: Arc<S>,
        clock: Arc<C>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            repository,
            sessions,
            breaker,
            store,
            clock,
            key: StateKeys::new(config.key_namespace.clone()).catalog(),
            settings: CatalogSettings {
                ttl: config.catalog_ttl(),
                list_timeout: config.list_timeout(),
                description_limit: config.description_limit,
                error_message_limit: config.error_message_limit,
            },
            memo: RwLock::new(None),
            previous: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Rebuilds the catalog from every enabled server.
    ///
    /// Servers that fail contribute no tools and are recorded on the
    /// snapshot; the refresh itself still succeeds. A server whose circuit
    /// is open keeps the tools it had in the previous snapshot, so calls to
    /// them are answered by the breaker rather than reported as unknown.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Registry`] when the server list cannot be read.
    pub async fn refresh(&self) -> CatalogResult<Arc<CatalogSnapshot>> {
        let mut servers = self.repository.list_all().await?;
        servers.sort_by(|left, right| left.name().cmp(right.name()));
        for disabled in servers.iter().filter(|server| !server.is_enabled()) {
            self.sessions.invalidate(disabled.id()).await;
        }
        let enabled: Vec<ToolServerConfig> = servers
            .into_iter()
            .filter(ToolServerConfig::is_enabled)
            .collect();

        let previous = self.previous_snapshot();
        let listings = join_all(
            enabled
                .iter()
                .map(|server| self.list_server(server, previous.as_deref())),
        )
        .await;

        let mut builder = CatalogBuilder::default();
        for (server, listing) in enabled.iter().zip(listings) {
            match &listing {
                ServerListing::Listed(tools) | ServerListing::Carried(tools) => {
                    builder.add_server(server.id(), server.name(), tools.clone());
                }
                ServerListing::Failed(message) | ServerListing::Skipped(message) => {
                    warn!(server = %server.name(), error = %message, "server contributed no tools");
                    builder.add_failure(server.id(), server.name(), message.clone());
                }
            }
            self.record_status(server, &listing).await;
        }

        let built = Arc::new(builder.build(self.clock.utc()));
        for shadowed in built.shadowed() {
            warn!(
                tool = %shadowed.tool_name,
                shadowed_server = %shadowed.shadowed_server,
                winning_server = %shadowed.winning_server,
                "tool name collision; the later server wins"
            );
        }
        info!(
            tools = built.len(),
            failures = built.failures().len(),
            "tool catalog refreshed"
        );
        self.publish(&built).await;
        Ok(built)
    }

    async fn list_server(
        &self,
        server: &ToolServerConfig,
        previous: Option<&CatalogSnapshot>,
    ) -> ServerListing {
        if self.breaker.is_tripped(server.id()).await {
            let carried = previous.map_or_else(Vec::new, |snapshot| snapshot.tools_of(server.id()));
            if !carried.is_empty() {
                debug!(server = %server.name(), "circuit open; keeping previously listed tools");
                return ServerListing::Carried(carried);
            }
        }
        if let BreakerDecision::Rejected { retry_after } = self.breaker.check(server.id()).await {
            return ServerListing::Skipped(format!(
                "circuit open; next trial in {}s",
                retry_after.num_seconds()
            ));
        }
        match self.fetch_tools(server).await {
            Ok(raw) => {
                self.breaker.record_success(server.id()).await;
                ServerListing::Listed(self.normalize(server, raw))
            }
            Err(err) => {
                self.breaker.record_failure(server.id()).await;
                ServerListing::Failed(
                    truncate_chars(&err.to_string(), self.settings.error_message_limit)
                        .into_owned(),
                )
            }
        }
    }

    async fn fetch_tools(
        &self,
        server: &ToolServerConfig,
    ) -> Result<Vec<RawToolDescriptor>, TransportError> {
        let session = self.sessions.acquire(server).await?;
        let bound = self.settings.list_timeout;
        let listed = tokio::time::timeout(
            bound,
            list_all_tools(session.connection().as_ref(), MAX_TOOL_PAGES),
        )
        .await
        .unwrap_or_else(|_| Err(TransportError::Timeout(bound)));
        if listed.is_err() {
            self.sessions.discard(&session).await;
        }
        listed
    }

    fn normalize(
        &self,
        server: &ToolServerConfig,
        raw: Vec<RawToolDescriptor>,
    ) -> Vec<ToolDefinition> {
        raw.into_iter()
            .filter_map(|descriptor| {
                ToolDefinition::from_untrusted(
                    &descriptor.name,
                    descriptor.description.as_deref(),
                    descriptor.input_schema,
                    self.settings.description_limit,
                )
                .map_err(|err| {
                    warn!(server = %server.name(), error = %err, "dropping tool definition");
                })
                .ok()
            })
            .collect()
    }

    async fn record_status(&self, listed_server: &ToolServerConfig, listing: &ServerListing) {
        let (status, message) = match listing {
            ServerListing::Listed(_) => (ToolServerStatus::Connected, None),
            ServerListing::Failed(message) => (
                ToolServerStatus::Error,
                Some(truncate_chars(message.trim(), MAX_STATUS_MESSAGE_CHARS).into_owned()),
            ),
            ServerListing::Carried(_) | ServerListing::Skipped(_) => return,
        };

        // Re-read so an edit made during the refresh is not overwritten.
        let current = match self.repository.find_by_id(listed_server.id()).await {
            Ok(Some(server))
                if server.is_enabled() && server.fingerprint() == listed_server.fingerprint() =>
            {
                server
            }
            Ok(_) => return,
            Err(err) => {
                warn!(server = %listed_server.name(), error = %err, "cannot re-read server");
                return;
            }
        };
        if !current.status_differs(status, message.as_deref()) {
            return;
        }
        let mut updated = current;
        if status == ToolServerStatus::Connected {
            updated.mark_connected(self.clock.as_ref());
        } else {
            updated.mark_error(message.unwrap_or_default(), self.clock.as_ref());
        }
        if let Err(err) = self.repository.update(&updated).await {
            warn!(server = %updated.name(), error = %err, "cannot record server status");
        }
    }

    fn memoize(&self, version: Option<u64>, snapshot: &Arc<CatalogSnapshot>) {
        {
            let mut memo = self.memo.write().unwrap_or_else(PoisonError::into_inner);
            *memo = Some(Memo {
                version,
                snapshot: Arc::clone(snapshot),
            });
        }
        let mut previous = self.previous.write().unwrap_or_else(PoisonError::into_inner);
        *previous = Some(Arc::clone(snapshot));
    }

    /// Last snapshot seen by this process, kept across invalidation.
    fn previous_snapshot(&self) -> Option<Arc<CatalogSnapshot>> {
        self.previous
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn memoized(&self, version: Option<u64>) -> Option<Arc<CatalogSnapshot>> {
        let memo = self.memo.read().unwrap_or_else(PoisonError::into_inner);
        memo.as_ref()
            .filter(|held| version.is_none() || held.version == version)
            .map(|held| Arc::clone(&held.snapshot))
    }

    async fn publish(&self, snapshot: &Arc<CatalogSnapshot>) {
        let version = match serde_json::to_value(snapshot.as_ref()) {
            Ok(value) => match self
                .store
                .put(&self.key, value, Some(self.settings.ttl))
                .await
            {
                Ok(version) => Some(version),
                Err(err) => {
                    warn!(error = %err, "cannot share catalog snapshot; keeping it local");
                    None
                }
            },
            Err(err) => {
                warn!(error = %err, "cannot encode catalog snapshot");
                None
            }
        };
        self.memoize(version, snapshot);
    }

    async fn lookup(&self) -> Option<Arc<CatalogSnapshot>> {
        let now = self.clock.utc();
        let ttl = time_delta(self.settings.ttl);
        let found = match self.store.get(&self.key).await {
            Ok(Some(stored)) => self.memoized(Some(stored.version)).or_else(|| {
                match serde_json::from_value::<CatalogSnapshot>(stored.value) {
                    Ok(decoded) => {
                        let shared = Arc::new(decoded);
                        self.memoize(Some(stored.version), &shared);
                        Some(shared)
                    }
                    Err(err) => {
                        warn!(error = %err, "discarding undecodable catalog snapshot");
                        None
                    }
                }
            }),
            Ok(None) => None,
            Err(err) => {
                debug!(error = %err, "catalog store unavailable; using local snapshot");
                self.memoized(None)
            }
        };
        found.filter(|snapshot| !snapshot.is_expired(now, ttl))
    }

    /// Returns the current snapshot, refreshing when none is live.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Registry`] when a needed refresh cannot read
    /// the server list.
    pub async fn current_snapshot(&self) -> CatalogResult<Arc<CatalogSnapshot>> {
        if let Some(snapshot) = self.lookup().await {
            return Ok(snapshot);
        }
        let _refreshing = self.refresh_lock.lock().await;
        if let Some(snapshot) = self.lookup().await {
            return Ok(snapshot);
        }
        self.refresh().await
    }

    /// Resolves the server that serves `tool_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Registry`] when a needed refresh fails.
    pub async fn find_server_for(&self, tool_name: &str) -> CatalogResult<Option<CatalogEntry>> {
        let snapshot = self.current_snapshot().await?;
        Ok(snapshot.find_server_for(tool_name).cloned())
    }

    /// Drops the snapshot everywhere, forcing the next lookup to refresh.
    pub async fn invalidate(&self) {
        {
            let mut memo = self.memo.write().unwrap_or_else(PoisonError::into_inner);
            *memo = None;
        }
        if let Err(err) = self.store.delete(&self.key).await {
            warn!(error = %err, "cannot delete shared catalog snapshot");
        }
        debug!("tool catalog invalidated");
    }
}
