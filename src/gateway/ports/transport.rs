//! Transport port: how the gateway talks to one MCP server.

use crate::gateway::domain::{InvocationErrorKind, ToolContent};
use crate::tool_registry::domain::{ToolServerConfig, ToolServerId, TransportKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Client identity advertised in the `initialize` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

/// A tool exactly as a server described it, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToolDescriptor {
    /// Tool name, empty when the server omitted it.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Optional input schema.
    pub input_schema: Option<Value>,
}

/// One page of a `tools/list` response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolsPage {
    /// Tools on this page.
    pub tools: Vec<RawToolDescriptor>,
    /// Cursor for the next page.
    pub next_cursor: Option<String>,
}

/// Outcome of a `tools/call` that reached the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallOutcome {
    /// The tool produced output.
    Completed(ToolContent),
    /// The server reported a tool or JSON-RPC error.
    Failed(String),
}

/// Errors raised by transport adapters.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server could not be reached or the connection was lost.
    #[error("connection error: {0}")]
    Connection(Arc<dyn std::error::Error + Send + Sync>),
    /// The server sent something that is not valid MCP.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The operation exceeded its time bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The server no longer recognizes the session.
    #[error("session expired on the server")]
    SessionExpired,
    /// The session was closed locally.
    #[error("session is closed")]
    Closed,
    /// The transport cannot reattach to an existing session.
    #[error("{0} sessions cannot be resumed")]
    NotResumable(TransportKind),
}

impl TransportError {
    /// Wraps an I/O or network failure.
    pub fn connection(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection(Arc::new(err))
    }

    /// Describes a connection failure without an underlying error value.
    pub fn connection_message(message: impl Into<String>) -> Self {
        Self::connection(std::io::Error::other(message.into()))
    }

    /// Describes a protocol violation.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Maps the error to the kind reported to the agent loop.
    #[must_use]
    pub const fn kind(&self) -> InvocationErrorKind {
        match self {
            Self::Protocol(_) => InvocationErrorKind::ProtocolError,
            Self::Timeout(_) => InvocationErrorKind::TimeoutError,
            Self::Connection(_) | Self::SessionExpired | Self::Closed | Self::NotResumable(_) => {
                InvocationErrorKind::ConnectionError
            }
        }
    }
}

/// A live, handshaken connection to one server.
///
/// `close` must be idempotent: the session cache, timeouts and cancellation
/// may all race to release the same connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait McpConnection: Send + Sync {
    /// Returns the transport kind.
    fn kind(&self) -> TransportKind;

    /// Returns the server-issued session id, if the transport has one.
    fn session_id(&self) -> Option<String>;

    /// Returns the subprocess id for stdio connections.
    fn process_id(&self) -> Option<u32>;

    /// Returns whether `close` has run or the peer went away.
    fn is_closed(&self) -> bool;

    /// Fetches one page of `tools/list`.
    async fn list_tools(&self, cursor: Option<String>) -> TransportResult<ToolsPage>;

    /// Calls a tool. Tool-reported failures are `Ok(ToolCallOutcome::Failed)`.
    async fn call_tool(&self, name: &str, arguments: Value) -> TransportResult<ToolCallOutcome>;

    /// Releases the underlying process or connection, ending any
    /// server-side session with it.
    async fn close(&self);

    /// Drops this handle while leaving a server-side session other workers
    /// may share. Transports without shared sessions simply close.
    async fn detach(&self) {
        self.close().await;
    }
}

/// Opens connections for one or more transport kinds.
#[async_trait]
pub trait McpTransportAdapter: Send + Sync {
    /// Performs the MCP `initialize` exchange.
    async fn handshake(&self, server: &ToolServerConfig) -> TransportResult<Arc<dyn McpConnection>>;

    /// Reattaches to a session another worker negotiated.
    async fn resume(
        &self,
        server: &ToolServerConfig,
        _session_id: &str,
    ) -> TransportResult<Arc<dyn McpConnection>> {
        Err(TransportError::NotResumable(server.transport().kind()))
    }
}

/// A cached connection plus its lifetime bookkeeping.
#[derive(Clone)]
pub struct McpSession {
    handle_id: Uuid,
    server_id: ToolServerId,
    fingerprint: String,
    connection: Arc<dyn McpConnection>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("McpSession")
            .field("handle_id", &self.handle_id)
            .field("server_id", &self.server_id)
            .field("kind", &self.connection.kind())
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl McpSession {
    /// Wraps a fresh connection.
    #[must_use]
    pub fn new(
        server: &ToolServerConfig,
        connection: Arc<dyn McpConnection>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            handle_id: Uuid::new_v4(),
            server_id: server.id(),
            fingerprint: server.fingerprint(),
            connection,
            created_at,
            expires_at,
            last_used_at: created_at,
        }
    }

    /// Returns the identity shared by every clone of this session.
    #[must_use]
    pub const fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    /// Returns the owning server.
    #[must_use]
    pub const fn server_id(&self) -> ToolServerId {
        self.server_id
    }

    /// Returns the connection-descriptor fingerprint at handshake time.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Returns the live connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<dyn McpConnection> {
        &self.connection
    }

    /// Returns when the session was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the session expires.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns when the session was last handed out.
    #[must_use]
    pub const fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    /// Records a use at `now`.
    pub const fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used_at = now;
    }

    /// Returns whether the session can no longer be handed out.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at || self.connection.is_closed()
    }

    /// Returns whether both values wrap the same connection.
    #[must_use]
    pub fn same_handle(&self, other: &Self) -> bool {
        self.handle_id == other.handle_id
    }
}

/// Fetches every page of `tools/list`, stopping at `max_pages` or when a
/// cursor repeats.
///
/// # Errors
///
/// Propagates the first transport error.
pub async fn list_all_tools(
    connection: &dyn McpConnection,
    max_pages: usize,
) -> TransportResult<Vec<RawToolDescriptor>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    let mut seen_cursors = std::collections::HashSet::new();
    for _ in 0..max_pages {
        let page = connection.list_tools(cursor.take()).await?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
            _ => break,
        }
    }
    Ok(tools)
}
