//! Scripted transport for exercising the gateway without real servers.
//!
//! Each server name maps to a [`ScriptedServer`] describing its tools, how
//! it answers calls and which failure it should simulate. Scripts are looked
//! up on every operation, so replacing one changes the behaviour of
//! connections that are already open.

use crate::gateway::domain::ToolContent;
use crate::gateway::ports::{
    McpConnection, McpTransportAdapter, RawToolDescriptor, ToolCallOutcome, ToolsPage,
    TransportError, TransportResult,
};
use crate::tool_registry::domain::{ToolServerConfig, TransportKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Computes a scripted tool result from the tool name and arguments.
pub type ToolHandler = Arc<dyn Fn(&str, &Value) -> ToolCallOutcome + Send + Sync>;

/// Failure a scripted server simulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptedBehaviour {
    /// Everything succeeds.
    #[default]
    Healthy,
    /// Handshakes fail with a connection error.
    Unreachable,
    /// Handshakes never complete.
    HangOnHandshake,
    /// `tools/list` never completes.
    HangOnList,
    /// `tools/call` never completes.
    HangOnCall,
    /// `tools/call` fails with a connection error.
    CallsFail,
    /// The `initialize` reply is not valid MCP.
    MalformedHandshake,
}

/// Script for one named server.
#[derive(Clone)]
pub struct ScriptedServer {
    tools: Vec<RawToolDescriptor>,
    handler: ToolHandler,
    behaviour: ScriptedBehaviour,
    handshake_delay: Option<Duration>,
}

impl fmt::Debug for ScriptedServer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ScriptedServer")
            .field("tools", &self.tools)
            .field("behaviour", &self.behaviour)
            .field("handshake_delay", &self.handshake_delay)
            .finish_non_exhaustive()
    }
}

impl Default for ScriptedServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedServer {
    /// Creates a healthy server with no tools whose handler echoes the
    /// arguments back as structured content.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            handler: Arc::new(|_, arguments| {
                ToolCallOutcome::Completed(ToolContent::Structured(arguments.clone()))
            }),
            behaviour: ScriptedBehaviour::Healthy,
            handshake_delay: None,
        }
    }

    /// Advertises a tool without an input schema.
    #[must_use]
    pub fn with_tool(self, name: &str, description: &str) -> Self {
        self.with_raw_tool(RawToolDescriptor {
            name: name.to_owned(),
            description: Some(description.to_owned()),
            input_schema: None,
        })
    }

    /// Advertises a tool exactly as given.
    #[must_use]
    pub fn with_raw_tool(mut self, tool: RawToolDescriptor) -> Self {
        self.tools.push(tool);
        self
    }

    /// Replaces the call handler.
    #[must_use]
    pub fn with_handler(
        mut self,
        handler: impl Fn(&str, &Value) -> ToolCallOutcome + Send + Sync + 'static,
    ) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Sets the simulated failure.
    #[must_use]
    pub const fn with_behaviour(mut self, behaviour: ScriptedBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    /// Delays every successful handshake.
    #[must_use]
    pub const fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = Some(delay);
        self
    }

    fn advertises(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name.trim() == tool_name)
    }
}

/// Operation counters for assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportStats {
    /// Successful and failed handshake attempts.
    pub handshakes: usize,
    /// Successful session resumptions.
    pub resumes: usize,
    /// `tools/list` requests.
    pub list_calls: usize,
    /// `tools/call` requests.
    pub tool_calls: usize,
    /// Connections currently open.
    pub live_connections: usize,
    /// Connections closed or detached.
    pub closes: usize,
    /// HTTP sessions ended on the server, as a `DELETE` would.
    pub ended_sessions: usize,
}

#[derive(Default)]
struct Counters {
    handshakes: AtomicUsize,
    resumes: AtomicUsize,
    list_calls: AtomicUsize,
    tool_calls: AtomicUsize,
    live_connections: AtomicUsize,
    closes: AtomicUsize,
    ended_sessions: AtomicUsize,
    issued_sessions: AtomicUsize,
}

#[derive(Default)]
struct Shared {
    scripts: RwLock<HashMap<String, ScriptedServer>>,
    live_sessions: RwLock<HashSet<String>>,
    counters: Counters,
}

impl Shared {
    fn script(&self, server: &str) -> TransportResult<ScriptedServer> {
        let scripts = self
            .scripts
            .read()
            .map_err(|err| TransportError::connection_message(err.to_string()))?;
        scripts.get(server).cloned().ok_or_else(|| {
            TransportError::connection_message(format!("no scripted server named {server}"))
        })
    }

    fn session_is_live(&self, session_id: &str) -> bool {
        self.live_sessions
            .read()
            .is_ok_and(|sessions| sessions.contains(session_id))
    }

    fn issue_session(&self) -> String {
        let number = self.counters.issued_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let session_id = format!("session-{number}");
        if let Ok(mut sessions) = self.live_sessions.write() {
            sessions.insert(session_id.clone());
        }
        session_id
    }

    fn end_session(&self, session_id: &str) {
        if let Ok(mut sessions) = self.live_sessions.write()
            && sessions.remove(session_id)
        {
            self.counters.ended_sessions.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Transport adapter backed by in-process scripts.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
}

impl fmt::Debug for InMemoryTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("InMemoryTransport").finish_non_exhaustive()
    }
}

impl InMemoryTransport {
    /// Creates a transport with no scripted servers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces the script for `server_name`.
    pub fn set_server(&self, server_name: &str, script: ScriptedServer) {
        if let Ok(mut scripts) = self.shared.scripts.write() {
            scripts.insert(server_name.to_owned(), script);
        }
    }

    /// Changes only the simulated failure of an installed script.
    pub fn set_behaviour(&self, server_name: &str, behaviour: ScriptedBehaviour) {
        if let Ok(mut scripts) = self.shared.scripts.write()
            && let Some(script) = scripts.get_mut(server_name)
        {
            script.behaviour = behaviour;
        }
    }

    /// Forgets every issued HTTP session id, as a restarted server would.
    pub fn expire_sessions(&self) {
        if let Ok(mut sessions) = self.shared.live_sessions.write() {
            sessions.clear();
        }
    }

    /// Returns a snapshot of the operation counters.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        let counters = &self.shared.counters;
        TransportStats {
            handshakes: counters.handshakes.load(Ordering::SeqCst),
            resumes: counters.resumes.load(Ordering::SeqCst),
            list_calls: counters.list_calls.load(Ordering::SeqCst),
            tool_calls: counters.tool_calls.load(Ordering::SeqCst),
            live_connections: counters.live_connections.load(Ordering::SeqCst),
            closes: counters.closes.load(Ordering::SeqCst),
            ended_sessions: counters.ended_sessions.load(Ordering::SeqCst),
        }
    }

    fn open(&self, server: &ToolServerConfig, session_id: Option<String>) -> Arc<dyn McpConnection> {
        self.shared
            .counters
            .live_connections
            .fetch_add(1, Ordering::SeqCst);
        Arc::new(InMemoryConnection {
            shared: Arc::clone(&self.shared),
            server: server.name().as_str().to_owned(),
            kind: server.transport().kind(),
            session_id,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl McpTransportAdapter for InMemoryTransport {
    async fn handshake(&self, server: &ToolServerConfig) -> TransportResult<Arc<dyn McpConnection>> {
        self.shared.counters.handshakes.fetch_add(1, Ordering::SeqCst);
        let script = self.shared.script(server.name().as_str())?;
        match script.behaviour {
            ScriptedBehaviour::Unreachable => {
                return Err(TransportError::connection_message("connection refused"));
            }
            ScriptedBehaviour::HangOnHandshake => std::future::pending::<()>().await,
            ScriptedBehaviour::MalformedHandshake => {
                return Err(TransportError::protocol(
                    "initialize result is missing protocolVersion",
                ));
            }
            _ => {}
        }
        if let Some(delay) = script.handshake_delay {
            tokio::time::sleep(delay).await;
        }
        let session_id = (server.transport().kind() == TransportKind::StreamableHttp)
            .then(|| self.shared.issue_session());
        Ok(self.open(server, session_id))
    }

    async fn resume(
        &self,
        server: &ToolServerConfig,
        session_id: &str,
    ) -> TransportResult<Arc<dyn McpConnection>> {
        if server.transport().kind() != TransportKind::StreamableHttp {
            return Err(TransportError::NotResumable(server.transport().kind()));
        }
        let script = self.shared.script(server.name().as_str())?;
        if script.behaviour == ScriptedBehaviour::Unreachable {
            return Err(TransportError::connection_message("connection refused"));
        }
        if !self.shared.session_is_live(session_id) {
            return Err(TransportError::SessionExpired);
        }
        self.shared.counters.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(self.open(server, Some(session_id.to_owned())))
    }
}

struct InMemoryConnection {
    shared: Arc<Shared>,
    server: String,
    kind: TransportKind,
    session_id: Option<String>,
    closed: AtomicBool,
}

impl InMemoryConnection {
    fn ready(&self) -> TransportResult<ScriptedServer> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if let Some(session_id) = self.session_id.as_deref()
            && !self.shared.session_is_live(session_id)
        {
            return Err(TransportError::SessionExpired);
        }
        self.shared.script(&self.server)
    }

    /// Marks the handle closed; returns `false` when it already was.
    fn release_handle(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let counters = &self.shared.counters;
        counters.closes.fetch_add(1, Ordering::SeqCst);
        counters.live_connections.fetch_sub(1, Ordering::SeqCst);
        true
    }
}

#[async_trait]
impl McpConnection for InMemoryConnection {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    fn process_id(&self) -> Option<u32> {
        None
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn list_tools(&self, _cursor: Option<String>) -> TransportResult<ToolsPage> {
        self.shared.counters.list_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.ready()?;
        match script.behaviour {
            ScriptedBehaviour::HangOnList => std::future::pending::<()>().await,
            ScriptedBehaviour::Unreachable => {
                return Err(TransportError::connection_message("connection reset"));
            }
            _ => {}
        }
        Ok(ToolsPage {
            tools: script.tools,
            next_cursor: None,
        })
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> TransportResult<ToolCallOutcome> {
        self.shared.counters.tool_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.ready()?;
        match script.behaviour {
            ScriptedBehaviour::HangOnCall => std::future::pending::<()>().await,
            ScriptedBehaviour::CallsFail | ScriptedBehaviour::Unreachable => {
                return Err(TransportError::connection_message("connection reset"));
            }
            _ => {}
        }
        if !script.advertises(name) {
            return Ok(ToolCallOutcome::Failed(format!("unknown tool: {name}")));
        }
        Ok((script.handler)(name, &arguments))
    }

    async fn close(&self) {
        if self.release_handle()
            && let Some(session_id) = self.session_id.as_deref()
        {
            self.shared.end_session(session_id);
        }
    }

    async fn detach(&self) {
        self.release_handle();
    }
}
