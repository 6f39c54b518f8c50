//! Tool server transport configuration value objects.

use super::{ParseTransportKindError, ToolRegistryDomainError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Wire transport used to reach a tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Newline-delimited JSON-RPC over a child process's stdio.
    Stdio,
    /// JSON-RPC requests POSTed, responses streamed as server-sent events.
    Sse,
    /// JSON-RPC over streamable HTTP with an optional session header.
    StreamableHttp,
}

impl TransportKind {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable_http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TransportKind {
    type Error = ParseTransportKindError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "streamable_http" | "http" => Ok(Self::StreamableHttp),
            _ => Err(ParseTransportKindError(value.to_owned())),
        }
    }
}

/// Transport settings for a tool server hosted over stdio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioTransportConfig {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_directory: Option<String>,
}

impl StdioTransportConfig {
    /// Creates a new stdio transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyStdioCommand`] when `command`
    /// is empty after trimming.
    pub fn new(command: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let normalized_command = command.into().trim().to_owned();
        if normalized_command.is_empty() {
            return Err(ToolRegistryDomainError::EmptyStdioCommand);
        }

        Ok(Self {
            command: normalized_command,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
        })
    }

    /// Replaces command-line arguments.
    #[must_use]
    pub fn with_args(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.args = values.into_iter().collect();
        self
    }

    /// Replaces process environment variables.
    #[must_use]
    pub fn with_env(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = values.into_iter().collect();
        self
    }

    /// Sets an explicit working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyWorkingDirectory`] when the
    /// provided value is empty after trimming.
    pub fn with_working_directory(
        mut self,
        value: impl Into<String>,
    ) -> Result<Self, ToolRegistryDomainError> {
        let normalized = value.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(ToolRegistryDomainError::EmptyWorkingDirectory);
        }

        self.working_directory = Some(normalized);
        Ok(self)
    }

    /// Returns the executable command.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns environment variables.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns the optional working directory.
    #[must_use]
    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }
}

/// Secret presented to an HTTP tool server.
///
/// `Debug` output never contains the secret material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scheme")]
pub enum Credential {
    /// Sent as `Authorization: Bearer <token>`.
    Bearer {
        /// Bearer token.
        token: String,
    },
    /// Sent verbatim under a custom header such as `X-API-Key`.
    Header {
        /// Header name.
        name: String,
        /// Header value.
        value: String,
    },
}

impl Credential {
    /// Creates a bearer-token credential.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyCredential`] for an empty token.
    pub fn bearer(token: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let normalized_token = token.into().trim().to_owned();
        if normalized_token.is_empty() {
            return Err(ToolRegistryDomainError::EmptyCredential("token"));
        }
        Ok(Self::Bearer {
            token: normalized_token,
        })
    }

    /// Creates a custom-header credential.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyCredential`] when the header
    /// name or value is empty.
    pub fn header(
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ToolRegistryDomainError> {
        let header_name = name.into().trim().to_owned();
        if header_name.is_empty() {
            return Err(ToolRegistryDomainError::EmptyCredential("header name"));
        }
        let header_value = value.into().trim().to_owned();
        if header_value.is_empty() {
            return Err(ToolRegistryDomainError::EmptyCredential("header value"));
        }
        Ok(Self::Header {
            name: header_name,
            value: header_value,
        })
    }

    /// Returns the `(header name, header value)` pair to send.
    #[must_use]
    pub fn header_pair(&self) -> (&str, String) {
        match self {
            Self::Bearer { token } => ("Authorization", format!("Bearer {token}")),
            Self::Header { name, value } => (name.as_str(), value.clone()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer { .. } => formatter.write_str("Credential::Bearer(<redacted>)"),
            Self::Header { name, .. } => {
                write!(formatter, "Credential::Header({name}: <redacted>)")
            }
        }
    }
}

/// Endpoint settings shared by the SSE and streamable-HTTP transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpEndpointConfig {
    url: String,
    credential: Option<Credential>,
}

impl HttpEndpointConfig {
    /// Creates an endpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError`] when `url` is empty or does not
    /// start with `http://` or `https://`.
    pub fn new(url: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let normalized_url = url.into().trim().to_owned();
        if normalized_url.is_empty() {
            return Err(ToolRegistryDomainError::EmptyEndpointUrl);
        }

        let has_valid_prefix =
            normalized_url.starts_with("http://") || normalized_url.starts_with("https://");
        if !has_valid_prefix {
            return Err(ToolRegistryDomainError::InvalidEndpointUrl(normalized_url));
        }

        Ok(Self {
            url: normalized_url,
            credential: None,
        })
    }

    /// Attaches a credential.
    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the optional credential.
    #[must_use]
    pub const fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }
}

/// Connection descriptor for a tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "config")]
pub enum ToolServerTransport {
    /// MCP over local process stdio.
    Stdio(StdioTransportConfig),
    /// MCP over HTTP with server-sent events.
    Sse(HttpEndpointConfig),
    /// MCP over streamable HTTP.
    StreamableHttp(HttpEndpointConfig),
}

impl ToolServerTransport {
    /// Creates a `stdio` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`StdioTransportConfig::new`].
    pub fn stdio(command: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        Ok(Self::Stdio(StdioTransportConfig::new(command)?))
    }

    /// Creates an `sse` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`HttpEndpointConfig::new`].
    pub fn sse(url: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        Ok(Self::Sse(HttpEndpointConfig::new(url)?))
    }

    /// Creates a `streamable_http` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`HttpEndpointConfig::new`].
    pub fn streamable_http(url: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        Ok(Self::StreamableHttp(HttpEndpointConfig::new(url)?))
    }

    /// Returns the transport kind.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Sse(_) => TransportKind::Sse,
            Self::StreamableHttp(_) => TransportKind::StreamableHttp,
        }
    }

    /// Returns a hex SHA-256 digest of the connection descriptor.
    ///
    /// Two descriptors with the same fingerprint reach the same server with
    /// the same credentials; cached sessions are only reused across workers
    /// when fingerprints match.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_str().as_bytes());
        match self {
            Self::Stdio(config) => {
                hasher.update(config.command().as_bytes());
                for arg in config.args() {
                    hasher.update([0_u8]);
                    hasher.update(arg.as_bytes());
                }
                for (key, value) in config.env() {
                    hasher.update([1_u8]);
                    hasher.update(key.as_bytes());
                    hasher.update([b'=']);
                    hasher.update(value.as_bytes());
                }
                if let Some(directory) = config.working_directory() {
                    hasher.update([2_u8]);
                    hasher.update(directory.as_bytes());
                }
            }
            Self::Sse(endpoint) | Self::StreamableHttp(endpoint) => {
                hasher.update(endpoint.url().as_bytes());
                if let Some(credential) = endpoint.credential() {
                    let (name, value) = credential.header_pair();
                    hasher.update([3_u8]);
                    hasher.update(name.as_bytes());
                    hasher.update(value.as_bytes());
                }
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}
