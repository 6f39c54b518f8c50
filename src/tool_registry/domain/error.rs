//! Error types for tool server configuration validation and parsing.

use thiserror::Error;

/// Errors returned while constructing tool registry domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolRegistryDomainError {
    /// The server name is empty after trimming.
    #[error("tool server name must not be empty")]
    EmptyServerName,

    /// The server name contains characters outside `[a-z0-9_-]`.
    #[error(
        "tool server name '{0}' contains invalid characters (only lowercase alphanumerics, '_' and '-' allowed)"
    )]
    InvalidServerName(String),

    /// The server name exceeds the storage limit.
    #[error("tool server name exceeds {limit} character limit: {name}")]
    ServerNameTooLong {
        /// Offending name.
        name: String,
        /// Maximum accepted length.
        limit: usize,
    },

    /// The stdio command is empty.
    #[error("stdio command must not be empty")]
    EmptyStdioCommand,

    /// The stdio working directory is empty after trimming.
    #[error("stdio working directory must not be empty when provided")]
    EmptyWorkingDirectory,

    /// The HTTP endpoint URL is empty.
    #[error("endpoint URL must not be empty")]
    EmptyEndpointUrl,

    /// The HTTP endpoint URL does not use an `http://` or `https://` scheme.
    #[error("endpoint URL '{0}' must start with 'http://' or 'https://'")]
    InvalidEndpointUrl(String),

    /// A credential header name or value is empty.
    #[error("credential {0} must not be empty")]
    EmptyCredential(&'static str),

    /// A tool definition name is empty after trimming.
    #[error("tool name must not be empty")]
    EmptyToolName,
}

/// Error returned while parsing a transport kind from persistence or config.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown tool server transport kind: {0}")]
pub struct ParseTransportKindError(pub String);

/// Error returned while parsing a server status from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown tool server status: {0}")]
pub struct ParseToolServerStatusError(pub String);
