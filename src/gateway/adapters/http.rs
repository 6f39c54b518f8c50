//! Streamable HTTP transport.
//!
//! Every JSON-RPC message is a POST to the endpoint. The server may answer
//! with a JSON body or an event stream carrying the response, and may issue
//! a session id on `initialize` that must accompany every later request.

use super::event_stream::EventStreamParser;
use super::jsonrpc::{
    Incoming, PROTOCOL_VERSION, RpcReply, call_tool_params, decode_message, decode_value,
    encode_notification, encode_reply, encode_request, initialize_params, list_tools_params,
    parse_call_result, parse_initialize, parse_tools_page, reply_to_server_request,
};
use crate::gateway::ports::{
    ClientInfo, McpConnection, McpTransportAdapter, ToolCallOutcome, ToolsPage, TransportError,
    TransportResult,
};
use crate::tool_registry::domain::{
    Credential, HttpEndpointConfig, ToolServerConfig, ToolServerTransport, TransportKind,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// Header carrying the server-issued session id.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the negotiated protocol revision.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Adds the configured credential header to a request.
pub(super) fn authorize(builder: RequestBuilder, credential: Option<&Credential>) -> RequestBuilder {
    let Some(secret) = credential else {
        return builder;
    };
    let (name, value) = secret.header_pair();
    builder.header(name, value)
}

/// Connects to streamable HTTP tool servers.
#[derive(Debug, Clone)]
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    info: ClientInfo,
}

impl StreamableHttpTransport {
    /// Creates the transport over a shared HTTP client.
    #[must_use]
    pub const fn new(client: reqwest::Client, info: ClientInfo) -> Self {
        Self { client, info }
    }

    fn endpoint(server: &ToolServerConfig) -> TransportResult<&HttpEndpointConfig> {
        match server.transport() {
            ToolServerTransport::StreamableHttp(endpoint) => Ok(endpoint),
            _ => Err(TransportError::connection_message(format!(
                "server {} is not a streamable HTTP server",
                server.name()
            ))),
        }
    }
}

#[async_trait]
impl McpTransportAdapter for StreamableHttpTransport {
    async fn handshake(&self, server: &ToolServerConfig) -> TransportResult<Arc<dyn McpConnection>> {
        let endpoint = Self::endpoint(server)?;
        let connection = HttpConnection::new(
            server.name().as_str(),
            self.client.clone(),
            endpoint.clone(),
            None,
        );

        let handshake = async {
            let reply = connection
                .request("initialize", Some(initialize_params(&self.info)))
                .await?;
            let protocol_version = parse_initialize(reply)?;
            connection.set_protocol_version(protocol_version);
            connection.notify("notifications/initialized").await
        };
        if let Err(err) = handshake.await {
            connection.close().await;
            return Err(err);
        }
        debug!(
            server = %server.name(),
            session_id = ?connection.session_id(),
            "streamable HTTP handshake complete"
        );
        Ok(Arc::new(connection))
    }

    async fn resume(
        &self,
        server: &ToolServerConfig,
        session_id: &str,
    ) -> TransportResult<Arc<dyn McpConnection>> {
        let endpoint = Self::endpoint(server)?;
        let connection = HttpConnection::new(
            server.name().as_str(),
            self.client.clone(),
            endpoint.clone(),
            Some(session_id.to_owned()),
        );
        connection.set_protocol_version(PROTOCOL_VERSION.to_owned());
        let reply = connection.request("ping", None).await?;
        reply.map_err(|error| {
            TransportError::protocol(format!("ping rejected ({}): {}", error.code, error.message))
        })?;
        Ok(Arc::new(connection))
    }
}

struct HttpConnection {
    server: String,
    client: reqwest::Client,
    endpoint: HttpEndpointConfig,
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl HttpConnection {
    fn new(
        server: &str,
        client: reqwest::Client,
        endpoint: HttpEndpointConfig,
        session_id: Option<String>,
    ) -> Self {
        Self {
            server: server.to_owned(),
            client,
            endpoint,
            session_id: RwLock::new(session_id),
            protocol_version: RwLock::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    fn set_protocol_version(&self, version: String) {
        if let Ok(mut slot) = self.protocol_version.write() {
            *slot = Some(version);
        }
    }

    fn current_session_id(&self) -> Option<String> {
        self.session_id.read().ok().and_then(|slot| slot.clone())
    }

    fn with_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut request = authorize(builder, self.endpoint.credential());
        if let Some(session_id) = self.current_session_id() {
            request = request.header(SESSION_ID_HEADER, session_id);
        }
        let version = self
            .protocol_version
            .read()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(protocol_version) = version {
            request = request.header(PROTOCOL_VERSION_HEADER, protocol_version);
        }
        request
    }

    async fn post(&self, body: String) -> TransportResult<Response> {
        let request = self
            .client
            .post(self.endpoint.url())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body);
        self.with_headers(request)
            .send()
            .await
            .map_err(TransportError::connection)
    }

    fn check_status(&self, response: &Response, method: &str) -> TransportResult<()> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND && self.current_session_id().is_some() {
            return Err(TransportError::SessionExpired);
        }
        if !status.is_success() {
            return Err(TransportError::connection_message(format!(
                "{method} returned HTTP {status}"
            )));
        }
        Ok(())
    }

    fn capture_session_id(&self, response: &Response) {
        let issued = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        if let Some(session_id) = issued
            && let Ok(mut slot) = self.session_id.write()
        {
            *slot = Some(session_id);
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> TransportResult<RpcReply> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self.post(encode_request(id, method, params)?).await?;
        self.check_status(&response, method)?;
        self.capture_session_id(&response);

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));
        if is_event_stream {
            return self.read_event_stream(response, id, method).await;
        }

        let body: Value = response.json().await.map_err(|err| {
            TransportError::protocol(format!("{method} response is not JSON: {err}"))
        })?;
        reply_from_body(body, id)
    }

    async fn read_event_stream(
        &self,
        response: Response,
        id: u64,
        method: &str,
    ) -> TransportResult<RpcReply> {
        let mut parser = EventStreamParser::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(TransportError::connection)?;
            for event in parser.push(&bytes) {
                if event.event != "message" {
                    continue;
                }
                match decode_message(&event.data) {
                    Ok(Incoming::Response { id: received, reply }) if received == id => {
                        return Ok(reply);
                    }
                    Ok(Incoming::Request {
                        id: request_id,
                        method: requested,
                    }) => {
                        self.answer(&request_id, &requested).await;
                    }
                    Ok(_) => {}
                    Err(err) => debug!(server = %self.server, error = %err, "skipping event"),
                }
            }
        }
        Err(TransportError::protocol(format!(
            "event stream ended before the {method} response"
        )))
    }

    async fn answer(&self, request_id: &Value, method: &str) {
        let body = encode_reply(request_id, reply_to_server_request(method));
        if let Err(err) = self.post(body).await {
            debug!(server = %self.server, %method, error = %err, "failed to answer server request");
        }
    }

    async fn notify(&self, method: &str) -> TransportResult<()> {
        let response = self.post(encode_notification(method, None)?).await?;
        self.check_status(&response, method)
    }
}

fn reply_from_body(body: Value, id: u64) -> TransportResult<RpcReply> {
    let messages = match body {
        Value::Array(batch) => batch,
        single => vec![single],
    };
    for message in messages {
        if let Incoming::Response {
            id: received,
            reply,
        } = decode_value(message)?
            && received == id
        {
            return Ok(reply);
        }
    }
    Err(TransportError::protocol(format!(
        "response body does not answer request {id}"
    )))
}

#[async_trait]
impl McpConnection for HttpConnection {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    fn session_id(&self) -> Option<String> {
        self.current_session_id()
    }

    fn process_id(&self) -> Option<u32> {
        None
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn list_tools(&self, cursor: Option<String>) -> TransportResult<ToolsPage> {
        let reply = self.request("tools/list", list_tools_params(cursor)).await?;
        parse_tools_page(reply)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> TransportResult<ToolCallOutcome> {
        let reply = self
            .request("tools/call", Some(call_tool_params(name, arguments)))
            .await?;
        parse_call_result(reply)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.current_session_id().is_none() {
            return;
        }
        let request = self.with_headers(self.client.delete(self.endpoint.url()));
        match tokio::time::timeout(CLOSE_TIMEOUT, request.send()).await {
            Ok(Ok(response)) => {
                debug!(server = %self.server, status = %response.status(), "session deleted");
            }
            Ok(Err(err)) => debug!(server = %self.server, error = %err, "session delete failed"),
            Err(_) => debug!(server = %self.server, "session delete timed out"),
        }
    }

    async fn detach(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(server = %self.server, "session handle dropped; session left to peers");
        }
    }
}
