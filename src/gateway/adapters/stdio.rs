//! stdio transport: one subprocess per session speaking newline-delimited
//! JSON-RPC over its standard streams.

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
    StdioTransportConfig, ToolServerConfig, ToolServerTransport, TransportKind,
};
use crate::truncate::truncate_chars;
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const LOGGED_LINE_LIMIT: usize = 200;

type SharedWriter = Arc<Mutex<Option<ChildStdin>>>;

/// Spawns stdio tool servers.
#[derive(Debug, Clone)]
pub struct StdioTransport {
    client: ClientInfo,
    termination_grace: Duration,
}

impl StdioTransport {
    /// Creates the transport. `termination_grace` is how long a server gets
    /// to exit after SIGTERM before it is killed.
    #[must_use]
    pub const fn new(client: ClientInfo, termination_grace: Duration) -> Self {
        Self {
            client,
            termination_grace,
        }
    }
}

#[async_trait]
impl McpTransportAdapter for StdioTransport {
    async fn handshake(&self, server: &ToolServerConfig) -> TransportResult<Arc<dyn McpConnection>> {
        let ToolServerTransport::Stdio(config) = server.transport() else {
            return Err(TransportError::connection_message(format!(
                "server {} is not a stdio server",
                server.name()
            )));
        };

        let connection =
            StdioConnection::spawn(server.name().as_str(), config, self.termination_grace)?;
        if let Err(err) = connection.initialize(&self.client).await {
            connection.close().await;
            return Err(err);
        }
        Ok(Arc::new(connection))
    }
}

struct StdioConnection {
    server: String,
    process_id: Option<u32>,
    writer: SharedWriter,
    child: Mutex<Option<Child>>,
    router: ResponseRouter,
    closed: AtomicBool,
    termination_grace: Duration,
}

impl StdioConnection {
    fn spawn(
        server: &str,
        config: &StdioTransportConfig,
        termination_grace: Duration,
    ) -> TransportResult<Self> {
        let mut command = Command::new(config.command());
        command
            .args(config.args())
            .envs(config.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(directory) = config.working_directory() {
            command.current_dir(directory);
        }

        let mut child = command.spawn().map_err(TransportError::connection)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::connection_message("stdin pipe unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::connection_message("stdout pipe unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::connection_message("stderr pipe unavailable"))?;

        let process_id = child.id();
        let writer: SharedWriter = Arc::new(Mutex::new(Some(stdin)));
        let router = ResponseRouter::new();
        tokio::spawn(read_stdout(
            server.to_owned(),
            BufReader::new(stdout),
            router.clone(),
            Arc::clone(&writer),
        ));
        tokio::spawn(forward_stderr(server.to_owned(), BufReader::new(stderr)));
        debug!(server, pid = ?process_id, command = config.command(), "spawned stdio tool server");

        Ok(Self {
            server: server.to_owned(),
            process_id,
            writer,
            child: Mutex::new(Some(child)),
            router,
            closed: AtomicBool::new(false),
            termination_grace,
        })
    }

    async fn initialize(&self, client: &ClientInfo) -> TransportResult<()> {
        let reply = self
            .request("initialize", Some(initialize_params(client)))
            .await?;
        let protocol_version = parse_initialize(reply)?;
        debug!(server = %self.server, %protocol_version, "stdio handshake complete");
        let notification = encode_notification("notifications/initialized", None)?;
        write_line(&self.writer, &notification).await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> TransportResult<RpcReply> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let (id, receiver) = self.router.register()?;
        let _pending = PendingRequest::new(self.router.clone(), id);
        let line = encode_request(id, method, params)?;
        write_line(&self.writer, &line).await?;
        await_reply(receiver, method).await
    }
}

#[async_trait]
impl McpConnection for StdioConnection {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn session_id(&self) -> Option<String> {
        None
    }

    fn process_id(&self) -> Option<u32> {
        self.process_id
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
        drop(self.writer.lock().await.take());
        let child = self.child.lock().await.take();
        if let Some(process) = child {
            terminate(&self.server, process, self.termination_grace).await;
        }
    }
}

async fn write_line(writer: &Mutex<Option<ChildStdin>>, line: &str) -> TransportResult<()> {
    let mut guard = writer.lock().await;
    let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(TransportError::connection)?;
    stdin
        .write_all(b"\n")
        .await
        .map_err(TransportError::connection)?;
    stdin.flush().await.map_err(TransportError::connection)
}

async fn read_stdout(
    server: String,
    stdout: BufReader<ChildStdout>,
    router: ResponseRouter,
    writer: SharedWriter,
) {
    let mut lines = stdout.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => handle_line(&server, line.trim(), &router, &writer).await,
            Ok(None) => break,
            Err(err) => {
                warn!(server = %server, error = %err, "failed to read tool server output");
                break;
            }
        }
    }
    router.close();
    debug!(server = %server, "tool server output closed");
}

async fn handle_line(server: &str, line: &str, router: &ResponseRouter, writer: &SharedWriter) {
    if line.is_empty() {
        return;
    }
    match decode_message(line) {
        Ok(Incoming::Response { id, reply }) => {
            if !router.resolve(id, reply) {
                debug!(server, id, "discarding response to an abandoned request");
            }
        }
        Ok(Incoming::Request { id, method }) => {
            let reply = encode_reply(&id, reply_to_server_request(&method));
            if let Err(err) = write_line(writer, &reply).await {
                debug!(server, %method, error = %err, "failed to answer server request");
            }
        }
        Ok(Incoming::Notification { method }) => {
            debug!(server, %method, "tool server notification");
        }
        Err(err) => {
            warn!(
                server,
                line = %truncate_chars(line, LOGGED_LINE_LIMIT),
                error = %err,
                "ignoring malformed tool server output"
            );
        }
    }
}

async fn forward_stderr(server: String, stderr: BufReader<ChildStderr>) {
    let mut lines = stderr.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %server, line = %truncate_chars(&line, LOGGED_LINE_LIMIT), "tool server stderr");
    }
}

async fn terminate(server: &str, mut child: Child, grace: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(server, %status, "tool server already exited");
            return;
        }
        Ok(None) => {}
        Err(err) => warn!(server, error = %err, "failed to poll tool server status"),
    }

    send_sigterm(server, &child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(server, %status, "tool server exited"),
        Ok(Err(err)) => warn!(server, error = %err, "failed to reap tool server"),
        Err(_) => {
            warn!(server, ?grace, "tool server ignored SIGTERM, killing");
            if let Err(err) = child.kill().await {
                warn!(server, error = %err, "failed to kill tool server");
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(server: &str, child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(raw_pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw_pid), Signal::SIGTERM) {
        debug!(server, error = %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_server: &str, _child: &Child) {}
