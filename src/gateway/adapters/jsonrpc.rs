//! JSON-RPC 2.0 envelopes and MCP payload decoding shared by every transport.

use crate::gateway::domain::ToolContent;
use crate::gateway::ports::{
    ClientInfo, RawToolDescriptor, ToolCallOutcome, ToolsPage, TransportError, TransportResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// MCP protocol revision the gateway speaks.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Result half of a JSON-RPC response.
pub type RpcReply = Result<Value, RpcError>;

#[derive(Serialize)]
struct OutgoingRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Serialize)]
struct OutgoingNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// Serializes a request.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] when the params cannot be encoded.
pub fn encode_request(id: u64, method: &str, params: Option<Value>) -> TransportResult<String> {
    serde_json::to_string(&OutgoingRequest {
        jsonrpc: JSONRPC_VERSION,
        id,
        method,
        params,
    })
    .map_err(|err| TransportError::protocol(format!("failed to encode {method}: {err}")))
}

/// Serializes a notification.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] when the params cannot be encoded.
pub fn encode_notification(method: &str, params: Option<Value>) -> TransportResult<String> {
    serde_json::to_string(&OutgoingNotification {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
    })
    .map_err(|err| TransportError::protocol(format!("failed to encode {method}: {err}")))
}

/// Builds the reply to a server-initiated request.
#[must_use]
pub fn encode_reply(id: &Value, reply: RpcReply) -> String {
    let envelope = match reply {
        Ok(result) => json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result}),
        Err(error) => json!({"jsonrpc": JSONRPC_VERSION, "id": id, "error": error}),
    };
    envelope.to_string()
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Response to one of our requests.
    Response {
        /// Request id we issued.
        id: u64,
        /// Result or error.
        reply: RpcReply,
    },
    /// Server-initiated request that expects a reply.
    Request {
        /// Server-chosen id, echoed in the reply.
        id: Value,
        /// Requested method.
        method: String,
    },
    /// Server-initiated notification.
    Notification {
        /// Notification method.
        method: String,
    },
}

/// Decodes one inbound JSON-RPC message.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] for text that is not a JSON-RPC
/// message or a response whose id we could not have issued.
pub fn decode_message(text: &str) -> TransportResult<Incoming> {
    let raw: RawMessage = serde_json::from_str(text)
        .map_err(|err| TransportError::protocol(format!("invalid JSON-RPC message: {err}")))?;
    classify(raw)
}

/// Decodes an already-parsed JSON-RPC message.
///
/// # Errors
///
/// Same as [`decode_message`].
pub fn decode_value(value: Value) -> TransportResult<Incoming> {
    let raw: RawMessage = serde_json::from_value(value)
        .map_err(|err| TransportError::protocol(format!("invalid JSON-RPC message: {err}")))?;
    classify(raw)
}

fn classify(raw: RawMessage) -> TransportResult<Incoming> {
    match (raw.method, raw.id) {
        (Some(method), Some(id)) => Ok(Incoming::Request { id, method }),
        (Some(method), None) => Ok(Incoming::Notification { method }),
        (None, Some(id)) => {
            let numeric = id
                .as_u64()
                .ok_or_else(|| TransportError::protocol(format!("unexpected response id {id}")))?;
            let reply = match (raw.result, raw.error) {
                (_, Some(error)) => Err(error),
                (Some(result), None) => Ok(result),
                (None, None) => {
                    return Err(TransportError::protocol(
                        "response carries neither result nor error",
                    ));
                }
            };
            Ok(Incoming::Response { id: numeric, reply })
        }
        (None, None) => Err(TransportError::protocol(
            "message has neither method nor id",
        )),
    }
}

/// Reply for a server-initiated request: `ping` succeeds, everything else
/// is unsupported.
#[must_use]
pub fn reply_to_server_request(method: &str) -> RpcReply {
    if method == "ping" {
        Ok(json!({}))
    } else {
        Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: format!("method not supported by client: {method}"),
            data: None,
        })
    }
}

/// Correlates responses with pending requests by id.
#[derive(Debug, Clone)]
pub struct ResponseRouter {
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<Option<HashMap<u64, oneshot::Sender<RpcReply>>>>>,
}

impl ResponseRouter {
    /// Creates a router that accepts requests.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(Some(HashMap::new()))),
        }
    }

    /// Allocates an id and a receiver for its response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once [`ResponseRouter::close`] ran.
    pub fn register(&self) -> TransportResult<(u64, oneshot::Receiver<RpcReply>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let mut guard = self
            .pending
            .lock()
            .map_err(|err| TransportError::connection_message(err.to_string()))?;
        let pending = guard.as_mut().ok_or(TransportError::Closed)?;
        pending.insert(id, sender);
        Ok((id, receiver))
    }

    /// Delivers a reply. Returns `false` for unknown ids.
    pub fn resolve(&self, id: u64, reply: RpcReply) -> bool {
        let sender = self
            .pending
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|pending| pending.remove(&id)));
        sender.is_some_and(|channel| channel.send(reply).is_ok())
    }

    /// Drops a pending request, for callers that stopped waiting.
    pub fn forget(&self, id: u64) {
        if let Ok(mut guard) = self.pending.lock()
            && let Some(pending) = guard.as_mut()
        {
            pending.remove(&id);
        }
    }

    /// Fails every pending request and rejects new ones.
    pub fn close(&self) {
        if let Ok(mut guard) = self.pending.lock() {
            guard.take();
        }
    }

    /// Returns whether the router was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self.pending.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }
}

impl Default for ResponseRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Drops a pending entry when the waiting future is abandoned.
pub struct PendingRequest {
    router: ResponseRouter,
    id: u64,
}

impl PendingRequest {
    /// Guards `id` on `router`.
    #[must_use]
    pub const fn new(router: ResponseRouter, id: u64) -> Self {
        Self { router, id }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.router.forget(self.id);
    }
}

/// Awaits a routed reply, mapping a dropped sender to a lost connection.
///
/// # Errors
///
/// Returns [`TransportError::Connection`] when the connection closed first.
pub async fn await_reply(
    receiver: oneshot::Receiver<RpcReply>,
    method: &str,
) -> TransportResult<RpcReply> {
    receiver.await.map_err(|_| {
        TransportError::connection_message(format!(
            "connection closed before {method} completed"
        ))
    })
}

/// Builds `initialize` params.
#[must_use]
pub fn initialize_params(client: &ClientInfo) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {"name": client.name, "version": client.version},
    })
}

/// Validates an `initialize` result and returns the negotiated protocol
/// version.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] for JSON-RPC errors or results that
/// lack `protocolVersion`.
pub fn parse_initialize(reply: RpcReply) -> TransportResult<String> {
    let result = reply.map_err(|error| {
        TransportError::protocol(format!(
            "initialize rejected ({}): {}",
            error.code, error.message
        ))
    })?;
    result
        .get("protocolVersion")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| TransportError::protocol("initialize result lacks protocolVersion"))
}

/// Builds `tools/list` params.
#[must_use]
pub fn list_tools_params(cursor: Option<String>) -> Option<Value> {
    cursor.map(|value| json!({"cursor": value}))
}

/// Decodes a `tools/list` result leniently.
///
/// Entries that are not objects are skipped; missing names become empty so
/// the catalog can drop them with a warning.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] for JSON-RPC errors or results
/// without a `tools` array.
pub fn parse_tools_page(reply: RpcReply) -> TransportResult<ToolsPage> {
    let result = reply.map_err(|error| {
        TransportError::protocol(format!(
            "tools/list failed ({}): {}",
            error.code, error.message
        ))
    })?;
    let entries = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::protocol("tools/list result lacks a tools array"))?;

    let tools = entries
        .iter()
        .filter_map(Value::as_object)
        .map(raw_descriptor)
        .collect();
    let next_cursor = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_owned);

    Ok(ToolsPage { tools, next_cursor })
}

fn raw_descriptor(entry: &Map<String, Value>) -> RawToolDescriptor {
    RawToolDescriptor {
        name: entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        description: entry
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned),
        input_schema: entry.get("inputSchema").cloned(),
    }
}

/// Builds `tools/call` params.
#[must_use]
pub fn call_tool_params(name: &str, arguments: Value) -> Value {
    let normalized = match arguments {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    json!({"name": name, "arguments": normalized})
}

/// Decodes a `tools/call` reply.
///
/// JSON-RPC errors and `isError: true` results become
/// [`ToolCallOutcome::Failed`].
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] when the result is not an object.
pub fn parse_call_result(reply: RpcReply) -> TransportResult<ToolCallOutcome> {
    let result = match reply {
        Ok(result) => result,
        Err(error) => {
            return Ok(ToolCallOutcome::Failed(format!(
                "{} (JSON-RPC error {})",
                error.message, error.code
            )));
        }
    };
    let Value::Object(fields) = result else {
        return Err(TransportError::protocol("tools/call result is not an object"));
    };

    let blocks = fields
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let is_error = fields
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let text = joined_text(&blocks);

    if is_error {
        return Ok(ToolCallOutcome::Failed(
            text.unwrap_or_else(|| "tool reported an error without details".to_owned()),
        ));
    }

    let content = fields.get("structuredContent").cloned().map_or_else(
        || text.map_or_else(|| ToolContent::Structured(Value::Array(blocks)), ToolContent::Text),
        ToolContent::Structured,
    );
    Ok(ToolCallOutcome::Completed(content))
}

/// Joins text blocks; `None` when any block is not text or there are none.
fn joined_text(blocks: &[Value]) -> Option<String> {
    if blocks.is_empty() {
        return None;
    }
    let parts: Option<Vec<&str>> = blocks
        .iter()
        .map(|block| {
            (block.get("type").and_then(Value::as_str) == Some("text"))
                .then(|| block.get("text").and_then(Value::as_str))
                .flatten()
        })
        .collect();
    parts.map(|texts| texts.join("\n"))
}
