//! Outcome of a single tool invocation as handed back to the agent loop.

use crate::truncate::truncate_chars;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Classification of a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvocationErrorKind {
    /// The tool is not in the current catalog.
    UnknownTool,
    /// The owning server's circuit is open.
    ServerUnavailable,
    /// A session could not be established or was lost.
    ConnectionError,
    /// The server sent a malformed or unexpected message.
    ProtocolError,
    /// The call exceeded its time bound.
    TimeoutError,
    /// The server reported that the tool itself failed.
    ToolExecutionError,
    /// The caller abandoned the call.
    Cancelled,
}

impl InvocationErrorKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownTool => "UnknownTool",
            Self::ServerUnavailable => "ServerUnavailable",
            Self::ConnectionError => "ConnectionError",
            Self::ProtocolError => "ProtocolError",
            Self::TimeoutError => "TimeoutError",
            Self::ToolExecutionError => "ToolExecutionError",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for InvocationErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Normalized tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolContent {
    /// Plain text, joined from the server's text blocks.
    Text(String),
    /// Structured output or non-text content blocks.
    Structured(Value),
}

impl ToolContent {
    /// Returns the text when the content is textual.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Structured(_) => None,
        }
    }
}

/// Result of `invoke`, always well-formed even on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationResult {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<InvocationErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl ToolInvocationResult {
    /// Creates a successful result.
    #[must_use]
    pub const fn success(content: ToolContent) -> Self {
        Self {
            ok: true,
            content: Some(content),
            error_kind: None,
            error_message: None,
        }
    }

    /// Creates a failed result whose message is truncated to
    /// `message_limit` characters.
    #[must_use]
    pub fn failure(kind: InvocationErrorKind, message: &str, message_limit: usize) -> Self {
        Self {
            ok: false,
            content: None,
            error_kind: Some(kind),
            error_message: Some(truncate_chars(message.trim(), message_limit).into_owned()),
        }
    }

    /// Returns whether the call succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.ok
    }

    /// Returns the content of a successful call.
    #[must_use]
    pub const fn content(&self) -> Option<&ToolContent> {
        self.content.as_ref()
    }

    /// Returns the failure classification.
    #[must_use]
    pub const fn error_kind(&self) -> Option<InvocationErrorKind> {
        self.error_kind
    }

    /// Returns the bounded failure message.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}
