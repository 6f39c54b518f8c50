//! Minimal stdio MCP server used by the transport integration tests.
//!
//! Usage:
//!
//! ```text
//! mcp_fixture_server
//! ```
//!
//! Reads newline-delimited JSON-RPC from stdin and answers `initialize`,
//! `ping`, `tools/list` and `tools/call`. The tool list is served in two
//! pages so clients must follow `nextCursor`. Tools:
//!
//! - `add`: sums the integer arguments `a` and `b`
//! - `echo`: returns its arguments as structured content
//! - `pid`: returns the server's process id
//! - `sleep`: answers after `ms` milliseconds
//! - `hang`: stops responding to anything
//! - `fail`: reports a tool error repeating `message` `times` times
//! - `explode`: exits without answering
//!
//! The second page also advertises a tool with a blank name, which clients
//! are expected to drop.

use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::time::Duration;

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

fn main() -> Result<(), BoxError> {
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    writeln!(io::stderr(), "fixture server {} ready", std::process::id())?;

    for read in stdin.lock().lines() {
        let line = read?;
        if line.trim().is_empty() {
            continue;
        }
        let message: Value = serde_json::from_str(&line)?;
        // Notifications carry no id; replies to our requests carry no method.
        let Some(id) = message.get("id").cloned() else {
            continue;
        };
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            continue;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        let outcome = match method {
            "initialize" => Ok(initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(list_tools(&params)),
            "tools/call" => call_tool(&params),
            other => Err(json!({
                "code": METHOD_NOT_FOUND,
                "message": format!("method not found: {other}"),
            })),
        };
        let reply = match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": "2025-03-26",
        "capabilities": {"tools": {"listChanged": false}},
        "serverInfo": {"name": "mcp-fixture-server", "version": env!("CARGO_PKG_VERSION")},
    })
}

fn list_tools(params: &Value) -> Value {
    let integer_pair = json!({
        "type": "object",
        "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
        "required": ["a", "b"],
    });
    if params.get("cursor").and_then(Value::as_str).is_none() {
        return json!({
            "tools": [
                {"name": "add", "description": "Adds two integers", "inputSchema": integer_pair},
                {"name": "echo", "description": "Returns its arguments", "inputSchema": {"type": "object"}},
                {"name": "pid", "description": "Reports the server process id"},
            ],
            "nextCursor": "page-2",
        });
    }
    json!({
        "tools": [
            {"name": "sleep", "description": "Answers after a delay", "inputSchema": {
                "type": "object", "properties": {"ms": {"type": "integer"}}
            }},
            {"name": "hang", "description": "Never answers"},
            {"name": "fail", "description": "Always reports an error"},
            {"name": "explode", "description": "Exits mid-call"},
            {"name": "  ", "description": "Nameless"},
        ],
    })
}

fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}]})
}

fn call_tool(params: &Value) -> Result<Value, Value> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let integer = |key: &str| arguments.get(key).and_then(Value::as_i64).unwrap_or(0);
    match name {
        "add" => Ok(text_result(
            &integer("a").saturating_add(integer("b")).to_string(),
        )),
        "echo" => Ok(json!({"content": [], "structuredContent": arguments})),
        "pid" => Ok(text_result(&std::process::id().to_string())),
        "sleep" => {
            let millis = arguments.get("ms").and_then(Value::as_u64).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(millis));
            Ok(text_result("slept"))
        }
        "hang" => loop {
            std::thread::sleep(Duration::from_secs(60));
        },
        "fail" => {
            let message = arguments
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("tool failed");
            let times = arguments
                .get("times")
                .and_then(Value::as_u64)
                .and_then(|count| usize::try_from(count).ok())
                .unwrap_or(1);
            Ok(json!({
                "isError": true,
                "content": [{"type": "text", "text": message.repeat(times)}],
            }))
        }
        "explode" => std::process::exit(3),
        other => Err(json!({
            "code": INVALID_PARAMS,
            "message": format!("unknown tool: {other}"),
        })),
    }
}
