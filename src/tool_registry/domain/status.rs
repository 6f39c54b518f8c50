//! Last-known connection status of a tool server.

use super::ParseToolServerStatusError;
use crate::truncate::truncate_chars;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum stored length of a status error message.
pub const MAX_STATUS_MESSAGE_CHARS: usize = 500;

/// Connection status of a tool server as last observed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolServerStatus {
    /// The gateway has not contacted the server yet.
    Unknown,
    /// The last handshake or tool listing succeeded.
    Connected,
    /// The last handshake or tool listing failed.
    Error,
}

impl ToolServerStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ToolServerStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ToolServerStatus {
    type Error = ParseToolServerStatusError;

    fn try_from(value: &str) -> Result<Self, ParseToolServerStatusError> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "unknown" => Ok(Self::Unknown),
            "connected" => Ok(Self::Connected),
            "error" => Ok(Self::Error),
            _ => Err(ParseToolServerStatusError(value.to_owned())),
        }
    }
}

/// Timestamped status observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerStatusSnapshot {
    status: ToolServerStatus,
    observed_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl ToolServerStatusSnapshot {
    /// Creates a status snapshot without an error message.
    #[must_use]
    pub const fn new(status: ToolServerStatus, observed_at: DateTime<Utc>) -> Self {
        Self {
            status,
            observed_at,
            last_error: None,
        }
    }

    /// Creates an `unknown` snapshot.
    #[must_use]
    pub const fn unknown(observed_at: DateTime<Utc>) -> Self {
        Self::new(ToolServerStatus::Unknown, observed_at)
    }

    /// Creates a `connected` snapshot.
    #[must_use]
    pub const fn connected(observed_at: DateTime<Utc>) -> Self {
        Self::new(ToolServerStatus::Connected, observed_at)
    }

    /// Creates an `error` snapshot carrying a bounded diagnostic.
    #[must_use]
    pub fn error(observed_at: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self::new(ToolServerStatus::Error, observed_at).with_last_error(message)
    }

    /// Attaches an error message, trimmed and truncated to
    /// [`MAX_STATUS_MESSAGE_CHARS`].
    #[must_use]
    pub fn with_last_error(mut self, message: impl Into<String>) -> Self {
        let raw = message.into();
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            self.last_error = Some(truncate_chars(trimmed, MAX_STATUS_MESSAGE_CHARS).into_owned());
        }
        self
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> ToolServerStatus {
        self.status
    }

    /// Returns when the status was observed.
    #[must_use]
    pub const fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Returns the last error message, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
