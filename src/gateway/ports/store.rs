//! Shared key/value store port for cross-worker gateway state.
//!
//! Circuit records, the catalog snapshot and resumable HTTP session ids live
//! here rather than in process memory, so every worker sees the same view.
//! All of it is cache: losing the store costs warm-up time, not correctness.

use crate::tool_registry::domain::ToolServerId;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for state store operations.
pub type StateStoreResult<T> = Result<T, StateStoreError>;

/// A stored value and the version that wrote it.
///
/// Versions are unique per store for the lifetime of the store, so a key
/// that is deleted and re-created never repeats an earlier version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// Stored JSON value.
    pub value: Value,
    /// Write version.
    pub version: u64,
}

/// Key/value store with per-key expiry and compare-and-swap.
#[async_trait]
pub trait SharedStateStore: Send + Sync {
    /// Reads a live (unexpired) value.
    async fn get(&self, key: &str) -> StateStoreResult<Option<VersionedValue>>;

    /// Writes unconditionally and returns the new version.
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> StateStoreResult<u64>;

    /// Writes only when the current version equals `expected_version`.
    ///
    /// `None` means "only if the key is absent or expired". Returns whether
    /// the write happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Value,
        ttl: Option<Duration>,
    ) -> StateStoreResult<bool>;

    /// Removes a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> StateStoreResult<()>;
}

/// Errors raised by state store implementations.
#[derive(Debug, Clone, Error)]
pub enum StateStoreError {
    /// The store could not be reached.
    #[error("state store unavailable: {0}")]
    Unavailable(Arc<dyn std::error::Error + Send + Sync>),
    /// A stored value could not be decoded.
    #[error("corrupt state for key {key}: {reason}")]
    Corrupt {
        /// Affected key.
        key: String,
        /// Decoding failure.
        reason: String,
    },
}

impl StateStoreError {
    /// Wraps a connectivity failure.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Arc::new(err))
    }

    /// Describes an undecodable value.
    pub fn corrupt(key: &str, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            key: key.to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Builds namespaced store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateKeys {
    namespace: String,
}

impl StateKeys {
    /// Creates a key builder for `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Key holding a server's circuit record.
    #[must_use]
    pub fn circuit(&self, server_id: ToolServerId) -> String {
        format!("{}:circuit:{server_id}", self.namespace)
    }

    /// Key holding a server's resumable session id.
    #[must_use]
    pub fn session(&self, server_id: ToolServerId) -> String {
        format!("{}:session:{server_id}", self.namespace)
    }

    /// Key holding the catalog snapshot.
    #[must_use]
    pub fn catalog(&self) -> String {
        format!("{}:catalog", self.namespace)
    }
}
