//! Dispatches handshakes to the adapter matching a server's transport.

use super::http::StreamableHttpTransport;
use super::sse::SseTransport;
use super::stdio::StdioTransport;
use crate::gateway::config::GatewayConfig;
use crate::gateway::ports::{McpConnection, McpTransportAdapter, TransportError, TransportResult};
use crate::tool_registry::domain::{ToolServerConfig, TransportKind};
use async_trait::async_trait;
use std::sync::Arc;

/// Transport adapter covering stdio, SSE and streamable HTTP servers.
#[derive(Debug, Clone)]
pub struct TransportRouter {
    stdio: StdioTransport,
    sse: SseTransport,
    streamable_http: StreamableHttpTransport,
}

impl TransportRouter {
    /// Assembles a router from individually built adapters.
    #[must_use]
    pub const fn new(
        stdio: StdioTransport,
        sse: SseTransport,
        streamable_http: StreamableHttpTransport,
    ) -> Self {
        Self {
            stdio,
            sse,
            streamable_http,
        }
    }

    /// Builds every adapter from gateway configuration, sharing one HTTP
    /// client between the HTTP-based transports.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connection`] when the HTTP client cannot be
    /// constructed.
    pub fn from_config(config: &GatewayConfig) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.handshake_timeout())
            .build()
            .map_err(TransportError::connection)?;
        let info = config.client_info();
        Ok(Self::new(
            StdioTransport::new(info.clone(), config.stdio_termination_grace()),
            SseTransport::new(client.clone(), info.clone()),
            StreamableHttpTransport::new(client, info),
        ))
    }
}

#[async_trait]
impl McpTransportAdapter for TransportRouter {
    async fn handshake(&self, server: &ToolServerConfig) -> TransportResult<Arc<dyn McpConnection>> {
        match server.transport().kind() {
            TransportKind::Stdio => self.stdio.handshake(server).await,
            TransportKind::Sse => self.sse.handshake(server).await,
            TransportKind::StreamableHttp => self.streamable_http.handshake(server).await,
        }
    }

    async fn resume(
        &self,
        server: &ToolServerConfig,
        session_id: &str,
    ) -> TransportResult<Arc<dyn McpConnection>> {
        match server.transport().kind() {
            TransportKind::StreamableHttp => self.streamable_http.resume(server, session_id).await,
            other => Err(TransportError::NotResumable(other)),
        }
    }
}
