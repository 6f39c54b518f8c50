//! Invocation façade: the single surface the agent loop calls.
//!
//! Expected failures (unknown tool, open circuit, transport trouble, tool
//! errors, timeouts, cancellation) come back as an `Ok` result with
//! `ok = false`; only an unreachable server registry is an `Err`.

use super::catalog::{CatalogError, CatalogIndex};
use super::circuit_breaker::{BreakerDecision, CircuitBreaker};
use super::session_cache::{SessionCache, SessionCacheSettings};
use crate::gateway::config::GatewayConfig;
use crate::gateway::domain::{CatalogSnapshot, InvocationErrorKind, ToolInvocationResult};
use crate::gateway::ports::{
    McpTransportAdapter, SharedStateStore, StateKeys, ToolCallOutcome, TransportError,
};
use crate::tool_registry::domain::{
    ToolDefinition, ToolServerConfig, ToolServerId, ToolServerName,
};
use crate::tool_registry::ports::{
    ToolServerChange, ToolServerChangeListener, ToolServerRepository, ToolServerRepositoryError,
};
use crate::truncate::preview_json;
use async_trait::async_trait;
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Infrastructure faults the gateway cannot degrade around.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The catalog could not be built.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// The server registry could not be read.
    #[error("tool server registry unavailable: {0}")]
    Registry(#[from] ToolServerRepositoryError),
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Discovers, caches and invokes tools on configured MCP servers.
pub struct ToolGateway<R, T, S, C>
where
    R: ToolServerRepository,
    T: McpTransportAdapter,
    S: SharedStateStore,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    sessions: Arc<SessionCache<T, S, C>>,
    breaker: Arc<CircuitBreaker<S, C>>,
    catalog: Arc<CatalogIndex<R, T, S, C>>,
    config: GatewayConfig,
}

impl<R, T, S, C> ToolGateway<R, T, S, C>
where
    R: ToolServerRepository,
    T: McpTransportAdapter,
    S: SharedStateStore,
    C: Clock + Send + Sync,
{
    /// Wires the session cache, breaker and catalog index together.
    ///
    /// `config` is used as given; call [`GatewayConfig::validate`] first
    /// when it comes from an untrusted file.
    #[must_use]
    pub fn new(
        repository: Arc<R>,
        transport: Arc<T>,
        store: Arc<S>,
        clock: Arc<C>,
        config: GatewayConfig,
    ) -> Self {
        let keys = StateKeys::new(config.key_namespace.clone());
        let sessions = Arc::new(SessionCache::new(
            transport,
            Arc::clone(&store),
            Arc::clone(&clock),
            keys.clone(),
            SessionCacheSettings {
                ttl: config.session_ttl(),
                handshake_timeout: config.handshake_timeout(),
            },
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            keys,
            config.circuit_policy(),
        ));
        let catalog = Arc::new(CatalogIndex::new(
            Arc::clone(&repository),
            Arc::clone(&sessions),
            Arc::clone(&breaker),
            store,
            clock,
            &config,
        ));
        Self {
            repository,
            sessions,
            breaker,
            catalog,
            config,
        }
    }

    /// Returns the session cache.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionCache<T, S, C>> {
        &self.sessions
    }

    /// Returns the circuit breaker.
    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreaker<S, C>> {
        &self.breaker
    }

    /// Returns the catalog index.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<CatalogIndex<R, T, S, C>> {
        &self.catalog
    }

    /// Returns the tool manifest for the agent, server identity hidden.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Catalog`] when the server registry cannot be
    /// read.
    pub async fn get_catalog(&self) -> GatewayResult<Vec<ToolDefinition>> {
        let snapshot = self.catalog.current_snapshot().await?;
        Ok(snapshot.manifest())
    }

    /// Forces a catalog rebuild.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Catalog`] when the server registry cannot be
    /// read.
    pub async fn refresh_catalog(&self) -> GatewayResult<Arc<CatalogSnapshot>> {
        Ok(self.catalog.refresh().await?)
    }

    /// Calls a tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] only when the server registry is
    /// unreachable.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> GatewayResult<ToolInvocationResult> {
        self.invoke_with_cancellation(tool_name, arguments, &CancellationToken::new())
            .await
    }

    /// Calls a tool by name, abandoning the call when `cancel` fires.
    ///
    /// A cancelled call closes its session and reports
    /// [`InvocationErrorKind::Cancelled`]; it does not count against the
    /// server's circuit.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] only when the server registry is
    /// unreachable.
    pub async fn invoke_with_cancellation(
        &self,
        tool_name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> GatewayResult<ToolInvocationResult> {
        let started = Instant::now();
        let preview = preview_json(&arguments, self.config.argument_log_limit);
        let Some(server) = self.resolve(tool_name).await? else {
            let result = self.failure(
                InvocationErrorKind::UnknownTool,
                &format!("unknown tool: {tool_name}"),
            );
            return Ok(log_outcome(tool_name, None, &preview, started, result));
        };
        let result = self.invoke_on(&server, tool_name, arguments, cancel).await;
        Ok(log_outcome(
            tool_name,
            Some(server.name()),
            &preview,
            started,
            result,
        ))
    }

    async fn resolve(&self, tool_name: &str) -> GatewayResult<Option<ToolServerConfig>> {
        let Some(entry) = self.catalog.find_server_for(tool_name).await? else {
            return Ok(None);
        };
        let server = self
            .repository
            .find_by_id(entry.server_id())
            .await?
            .filter(ToolServerConfig::is_enabled);
        if server.is_none() {
            debug!(tool = tool_name, server = %entry.server_name(), "owning server gone or disabled");
            self.catalog.invalidate().await;
        }
        Ok(server)
    }

    async fn invoke_on(
        &self,
        server: &ToolServerConfig,
        tool_name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> ToolInvocationResult {
        let server_id = server.id();
        if let BreakerDecision::Rejected { retry_after } = self.breaker.check(server_id).await {
            return self.failure(
                InvocationErrorKind::ServerUnavailable,
                &format!(
                    "tool server {} is unavailable; retry in {}s",
                    server.name(),
                    retry_after.num_seconds()
                ),
            );
        }

        let acquired = tokio::select! {
            biased;
            () = cancel.cancelled() => return self.cancelled(),
            acquired = self.sessions.acquire(server) => acquired,
        };
        let session = match acquired {
            Ok(session) => session,
            Err(err) => {
                self.breaker.record_failure(server_id).await;
                return self.failure(err.kind(), &err.to_string());
            }
        };

        let bound = self.config.call_timeout();
        let call = tokio::time::timeout(bound, session.connection().call_tool(tool_name, arguments));
        let finished = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            finished = call => Some(finished),
        };
        let Some(outcome) = finished else {
            self.sessions.discard(&session).await;
            return self.cancelled();
        };

        match outcome {
            Ok(Ok(ToolCallOutcome::Completed(content))) => {
                self.breaker.record_success(server_id).await;
                ToolInvocationResult::success(content)
            }
            Ok(Ok(ToolCallOutcome::Failed(message))) => {
                self.breaker.record_failure(server_id).await;
                self.failure(InvocationErrorKind::ToolExecutionError, &message)
            }
            Ok(Err(err)) => {
                self.breaker.record_failure(server_id).await;
                self.sessions.discard(&session).await;
                self.failure(err.kind(), &err.to_string())
            }
            Err(_) => {
                self.breaker.record_failure(server_id).await;
                self.sessions.discard(&session).await;
                self.failure(
                    InvocationErrorKind::TimeoutError,
                    &TransportError::Timeout(bound).to_string(),
                )
            }
        }
    }

    fn failure(&self, kind: InvocationErrorKind, message: &str) -> ToolInvocationResult {
        ToolInvocationResult::failure(kind, message, self.config.error_message_limit)
    }

    fn cancelled(&self) -> ToolInvocationResult {
        self.failure(
            InvocationErrorKind::Cancelled,
            "invocation cancelled by the caller",
        )
    }

    /// Drops every piece of state derived from one server.
    pub async fn forget_server(&self, server_id: ToolServerId) {
        self.sessions.invalidate(server_id).await;
        self.breaker.forget(server_id).await;
        self.catalog.invalidate().await;
    }

    /// Closes every cached session.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}

impl<R, T, S, C> ToolGateway<R, T, S, C>
where
    R: ToolServerRepository,
    T: McpTransportAdapter + 'static,
    S: SharedStateStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Starts the expired-session sweeper; it runs until `cancel` fires.
    #[must_use]
    pub fn spawn_maintenance(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.sessions).spawn_sweeper(self.config.session_sweep_interval(), cancel)
    }
}

fn log_outcome(
    tool_name: &str,
    server: Option<&ToolServerName>,
    arguments: &str,
    started: Instant,
    result: ToolInvocationResult,
) -> ToolInvocationResult {
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let server_name = server.map_or("", ToolServerName::as_str);
    if result.is_ok() {
        info!(tool = tool_name, server = server_name, arguments, elapsed_ms, "tool invoked");
    } else {
        warn!(
            tool = tool_name,
            server = server_name,
            arguments,
            elapsed_ms,
            error_kind = result.error_kind().map_or("", InvocationErrorKind::as_str),
            error = result.error_message().unwrap_or_default(),
            "tool invocation failed"
        );
    }
    result
}

#[async_trait]
impl<R, T, S, C> ToolServerChangeListener for ToolGateway<R, T, S, C>
where
    R: ToolServerRepository,
    T: McpTransportAdapter,
    S: SharedStateStore,
    C: Clock + Send + Sync,
{
    async fn server_changed(&self, server_id: ToolServerId, change: ToolServerChange) {
        debug!(%server_id, ?change, "tool server configuration changed");
        self.forget_server(server_id).await;
        if change == ToolServerChange::Removed {
            self.sessions.remove_server(server_id).await;
        }
    }
}
