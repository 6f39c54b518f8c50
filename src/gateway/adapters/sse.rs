//! Legacy HTTP+SSE transport.
//!
//! The client holds a long-lived `GET` event stream. The server's first
//! `endpoint` event names the URL that requests are POSTed to, and every
//! response arrives back on the stream as a `message` event.

use super::event_stream::{EventStreamParser, ServerSentEvent};
use super::http::authorize;
use super::jsonrpc::{
    Incoming, PendingRequest, ResponseRouter, RpcReply, await_reply, call_tool_params,
    decode_message, encode_notification, encode_reply, encode_request, initialize_params,
    list_tools_params, parse_call_result, parse_initialize, parse_tools_page,
    reply_to_server_request,
};
use crate::gateway::ports::{
    ClientInfo, McpConnection, McpTransportAdapter, ToolCallOutcome, ToolsPage, TransportError,
    TransportResult,
};
use crate::tool_registry::domain::{
    Credential, ToolServerConfig, ToolServerTransport, TransportKind,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Response, Url};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

/// Connects to HTTP+SSE tool servers.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    info: ClientInfo,
}

impl SseTransport {
    /// Creates the transport over a shared HTTP client.
    #[must_use]
    pub const fn new(client: reqwest::Client, info: ClientInfo) -> Self {
        Self { client, info }
    }
}

#[async_trait]
impl McpTransportAdapter for SseTransport {
    async fn handshake(&self, server: &ToolServerConfig) -> TransportResult<Arc<dyn McpConnection>> {
        let ToolServerTransport::Sse(endpoint) = server.transport() else {
            return Err(TransportError::connection_message(format!(
                "server {} is not an SSE server",
                server.name()
            )));
        };
        let base = Url::parse(endpoint.url()).map_err(TransportError::connection)?;
        let request = self
            .client
            .get(base.clone())
            .header(ACCEPT, "text/event-stream");
        let response = authorize(request, endpoint.credential())
            .send()
            .await
            .map_err(TransportError::connection)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::connection_message(format!(
                "event stream returned HTTP {status}"
            )));
        }

        let poster = Poster {
            client: self.client.clone(),
            credential: endpoint.credential().cloned(),
        };
        let router = ResponseRouter::new();
        let cancel = CancellationToken::new();
        let (endpoint_sender, endpoint_receiver) = oneshot::channel();
        let reader = EventReader {
            server: server.name().as_str().to_owned(),
            base,
            endpoint_sender: Some(endpoint_sender),
            post_url: None,
            router: router.clone(),
            poster: poster.clone(),
        };
        tokio::spawn(reader.run(response, cancel.clone()));

        let guard = cancel.clone().drop_guard();
        let post_url = endpoint_receiver.await.map_err(|_| {
            TransportError::connection_message("event stream closed before the endpoint event")
        })??;

        let connection = SseConnection {
            server: server.name().as_str().to_owned(),
            poster,
            post_url,
            router,
            closed: AtomicBool::new(false),
            cancel,
            _reader: guard,
        };
        if let Err(err) = connection.initialize(&self.info).await {
            connection.close().await;
            return Err(err);
        }
        Ok(Arc::new(connection))
    }
}

#[derive(Clone)]
struct Poster {
    client: reqwest::Client,
    credential: Option<Credential>,
}

impl Poster {
    async fn post(&self, url: &Url, body: String) -> TransportResult<()> {
        let request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        let response = authorize(request, self.credential.as_ref())
            .send()
            .await
            .map_err(TransportError::connection)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::connection_message(format!(
                "message endpoint returned HTTP {status}"
            )))
        }
    }
}

struct EventReader {
    server: String,
    base: Url,
    endpoint_sender: Option<oneshot::Sender<TransportResult<Url>>>,
    post_url: Option<Url>,
    router: ResponseRouter,
    poster: Poster,
}

impl EventReader {
    async fn run(mut self, response: Response, cancel: CancellationToken) {
        let mut parser = EventStreamParser::new();
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                debug!(server = %self.server, "event stream ended");
                break;
            };
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(server = %self.server, error = %err, "event stream failed");
                    break;
                }
            };
            for event in parser.push(&bytes) {
                self.handle(event).await;
            }
        }
        self.router.close();
    }

    async fn handle(&mut self, event: ServerSentEvent) {
        match event.event.as_str() {
            "endpoint" => self.accept_endpoint(&event.data),
            "message" => match decode_message(&event.data) {
                Ok(Incoming::Response { id, reply }) => {
                    if !self.router.resolve(id, reply) {
                        debug!(server = %self.server, id, "dropping unmatched response");
                    }
                }
                Ok(Incoming::Request { id, method }) => self.answer(&id, &method).await,
                Ok(Incoming::Notification { .. }) => {}
                Err(err) => debug!(server = %self.server, error = %err, "skipping event"),
            },
            other => debug!(server = %self.server, event = other, "ignoring event type"),
        }
    }

    fn accept_endpoint(&mut self, data: &str) {
        let resolved = self
            .base
            .join(data.trim())
            .map_err(TransportError::connection);
        if let Ok(url) = &resolved {
            self.post_url = Some(url.clone());
        }
        if let Some(sender) = self.endpoint_sender.take()
            && sender.send(resolved).is_err()
        {
            debug!(server = %self.server, "handshake abandoned before the endpoint arrived");
        }
    }

    async fn answer(&self, id: &Value, method: &str) {
        let Some(url) = self.post_url.as_ref() else {
            return;
        };
        let body = encode_reply(id, reply_to_server_request(method));
        if let Err(err) = self.poster.post(url, body).await {
            debug!(server = %self.server, %method, error = %err, "failed to answer server request");
        }
    }
}

struct SseConnection {
    server: String,
    poster: Poster,
    post_url: Url,
    router: ResponseRouter,
    closed: AtomicBool,
    cancel: CancellationToken,
    _reader: DropGuard,
}

impl SseConnection {
    async fn initialize(&self, client: &ClientInfo) -> TransportResult<()> {
        let reply = self
            .request("initialize", Some(initialize_params(client)))
            .await?;
        let protocol_version = parse_initialize(reply)?;
        debug!(server = %self.server, %protocol_version, "SSE handshake complete");
        let notification = encode_notification("notifications/initialized", None)?;
        self.poster.post(&self.post_url, notification).await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> TransportResult<RpcReply> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let (id, receiver) = self.router.register()?;
        let _pending = PendingRequest::new(self.router.clone(), id);
        self.poster
            .post(&self.post_url, encode_request(id, method, params)?)
            .await?;
        await_reply(receiver, method).await
    }
}

#[async_trait]
impl McpConnection for SseConnection {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn session_id(&self) -> Option<String> {
        None
    }

    fn process_id(&self) -> Option<u32> {
        None
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.router.is_closed()
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
        self.router.close();
        self.cancel.cancel();
        debug!(server = %self.server, "SSE connection closed");
    }
}
