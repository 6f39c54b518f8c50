//! Gateway tuning knobs.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration file. Durations are stored as whole seconds or milliseconds
//! to keep the on-disk format free of unit strings.

use crate::gateway::domain::CircuitPolicy;
use crate::gateway::ports::ClientInfo;
use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Upper bound accepted for any configured duration.
pub const MAX_CONFIGURED_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Runtime configuration for the tool gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Lifetime of a cached session, in seconds.
    pub session_ttl_secs: u64,
    /// Interval between background sweeps of expired sessions, in seconds.
    pub session_sweep_interval_secs: u64,
    /// Lifetime of a catalog snapshot, in seconds.
    pub catalog_ttl_secs: u64,
    /// Maximum tool description length, in characters.
    pub description_limit: usize,
    /// Consecutive failures that trip a server's circuit.
    pub circuit_failure_threshold: u32,
    /// Time an open circuit rejects calls before allowing a trial, in seconds.
    pub circuit_cooldown_secs: u64,
    /// Bound on the MCP `initialize` exchange, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Bound on `tools/list`, in milliseconds.
    pub list_timeout_ms: u64,
    /// Bound on `tools/call`, in milliseconds.
    pub call_timeout_ms: u64,
    /// Maximum error message length in results and logs, in characters.
    pub error_message_limit: usize,
    /// Maximum logged argument preview length, in characters.
    pub argument_log_limit: usize,
    /// Grace period between SIGTERM and SIGKILL for stdio servers, in
    /// milliseconds.
    pub stdio_termination_grace_ms: u64,
    /// Client name advertised during the handshake.
    pub client_name: String,
    /// Client version advertised during the handshake.
    pub client_version: String,
    /// Prefix for every key written to the shared state store.
    pub key_namespace: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 300,
            session_sweep_interval_secs: 30,
            catalog_ttl_secs: 60,
            description_limit: crate::tool_registry::domain::DEFAULT_DESCRIPTION_LIMIT,
            circuit_failure_threshold: 5,
            circuit_cooldown_secs: 60,
            handshake_timeout_ms: 10_000,
            list_timeout_ms: 10_000,
            call_timeout_ms: 30_000,
            error_message_limit: 500,
            argument_log_limit: 200,
            stdio_termination_grace_ms: 2_000,
            client_name: env!("CARGO_PKG_NAME").to_owned(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            key_namespace: "mcp-gateway".to_owned(),
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration path has no file name component.
    #[error("configuration path must name a file: {0}")]
    InvalidPath(String),
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON for [`GatewayConfig`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// A field holds a value the gateway cannot work with.
    #[error("invalid configuration field `{field}`: {reason}")]
    InvalidField {
        /// Offending field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

impl GatewayConfig {
    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be opened or parsed, or
    /// when [`GatewayConfig::validate`] rejects its contents.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| ConfigError::InvalidPath(path.to_string()))?;
        let parent = path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
        let contents = dir.read_to_string(file_name)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every field is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for the first rejected field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("session_ttl_secs", self.session_ttl()),
            ("session_sweep_interval_secs", self.session_sweep_interval()),
            ("catalog_ttl_secs", self.catalog_ttl()),
            ("circuit_cooldown_secs", self.circuit_cooldown()),
            ("handshake_timeout_ms", self.handshake_timeout()),
            ("list_timeout_ms", self.list_timeout()),
            ("call_timeout_ms", self.call_timeout()),
        ];
        for (field, duration) in durations {
            if duration.is_zero() {
                return Err(ConfigError::InvalidField {
                    field,
                    reason: "must be greater than zero",
                });
            }
            if duration > MAX_CONFIGURED_DURATION {
                return Err(ConfigError::InvalidField {
                    field,
                    reason: "must not exceed seven days",
                });
            }
        }
        if self.stdio_termination_grace() > MAX_CONFIGURED_DURATION {
            return Err(ConfigError::InvalidField {
                field: "stdio_termination_grace_ms",
                reason: "must not exceed seven days",
            });
        }

        let positive_counts = [
            ("description_limit", self.description_limit),
            ("error_message_limit", self.error_message_limit),
            ("argument_log_limit", self.argument_log_limit),
        ];
        for (field, value) in positive_counts {
            if value == 0 {
                return Err(ConfigError::InvalidField {
                    field,
                    reason: "must be greater than zero",
                });
            }
        }
        if self.circuit_failure_threshold == 0 {
            return Err(ConfigError::InvalidField {
                field: "circuit_failure_threshold",
                reason: "must be greater than zero",
            });
        }
        if self.key_namespace.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "key_namespace",
                reason: "must not be empty",
            });
        }
        if self.client_name.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "client_name",
                reason: "must not be empty",
            });
        }
        Ok(())
    }

    /// Session lifetime.
    #[must_use]
    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Interval between expired-session sweeps.
    #[must_use]
    pub const fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }

    /// Catalog snapshot lifetime.
    #[must_use]
    pub const fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }

    /// Open-circuit cooldown window.
    #[must_use]
    pub const fn circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }

    /// Handshake bound.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// `tools/list` bound.
    #[must_use]
    pub const fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }

    /// `tools/call` bound.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// SIGTERM-to-SIGKILL grace period for stdio servers.
    #[must_use]
    pub const fn stdio_termination_grace(&self) -> Duration {
        Duration::from_millis(self.stdio_termination_grace_ms)
    }

    /// Client identity for the MCP handshake.
    #[must_use]
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            name: self.client_name.clone(),
            version: self.client_version.clone(),
        }
    }

    /// Breaker thresholds.
    #[must_use]
    pub fn circuit_policy(&self) -> CircuitPolicy {
        CircuitPolicy {
            failure_threshold: self.circuit_failure_threshold,
            cooldown: time_delta(self.circuit_cooldown()),
        }
    }
}

/// Converts a standard duration into a clock delta, saturating on overflow.
#[must_use]
pub fn time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
