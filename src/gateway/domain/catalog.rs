//! Aggregated tool catalog across all enabled servers.

use crate::tool_registry::domain::{ToolDefinition, ToolServerId, ToolServerName};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One tool and the server that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    tool: ToolDefinition,
    server_id: ToolServerId,
    server_name: ToolServerName,
}

impl CatalogEntry {
    /// Returns the tool definition.
    #[must_use]
    pub const fn tool(&self) -> &ToolDefinition {
        &self.tool
    }

    /// Returns the owning server's identifier.
    #[must_use]
    pub const fn server_id(&self) -> ToolServerId {
        self.server_id
    }

    /// Returns the owning server's name.
    #[must_use]
    pub const fn server_name(&self) -> &ToolServerName {
        &self.server_name
    }
}

/// A tool hidden because a later server exposes the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowedTool {
    /// Colliding tool name.
    pub tool_name: String,
    /// Server whose entry was dropped.
    pub shadowed_server: ToolServerName,
    /// Server whose entry is served.
    pub winning_server: ToolServerName,
}

/// A server that contributed no tools to the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRefreshFailure {
    /// Server identifier.
    pub server_id: ToolServerId,
    /// Server name.
    pub server_name: ToolServerName,
    /// Bounded failure description.
    pub message: String,
}

/// Immutable result of one catalog refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredCatalogSnapshot")]
pub struct CatalogSnapshot {
    entries: Vec<CatalogEntry>,
    shadowed: Vec<ShadowedTool>,
    failures: Vec<ServerRefreshFailure>,
    built_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    index: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct StoredCatalogSnapshot {
    entries: Vec<CatalogEntry>,
    shadowed: Vec<ShadowedTool>,
    failures: Vec<ServerRefreshFailure>,
    built_at: DateTime<Utc>,
}

impl From<StoredCatalogSnapshot> for CatalogSnapshot {
    fn from(stored: StoredCatalogSnapshot) -> Self {
        let index = stored
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.tool.name().to_owned(), position))
            .collect();
        Self {
            entries: stored.entries,
            shadowed: stored.shadowed,
            failures: stored.failures,
            built_at: stored.built_at,
            index,
        }
    }
}

impl CatalogSnapshot {
    /// Returns an empty snapshot.
    #[must_use]
    pub fn empty(built_at: DateTime<Utc>) -> Self {
        CatalogBuilder::default().build(built_at)
    }

    /// Looks up the entry serving `tool_name`.
    #[must_use]
    pub fn find_server_for(&self, tool_name: &str) -> Option<&CatalogEntry> {
        self.index
            .get(tool_name)
            .and_then(|position| self.entries.get(*position))
    }

    /// Returns the LLM-facing manifest in catalog order.
    #[must_use]
    pub fn manifest(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|entry| entry.tool.clone()).collect()
    }

    /// Returns every entry in catalog order.
    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Returns the tools `server_id` serves in this snapshot.
    #[must_use]
    pub fn tools_of(&self, server_id: ToolServerId) -> Vec<ToolDefinition> {
        self.entries
            .iter()
            .filter(|entry| entry.server_id == server_id)
            .map(|entry| entry.tool.clone())
            .collect()
    }

    /// Returns tools dropped by the collision rule.
    #[must_use]
    pub fn shadowed(&self) -> &[ShadowedTool] {
        &self.shadowed
    }

    /// Returns servers that failed during the refresh.
    #[must_use]
    pub fn failures(&self) -> &[ServerRefreshFailure] {
        &self.failures
    }

    /// Returns when the snapshot was built.
    #[must_use]
    pub const fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Returns whether the snapshot is older than `ttl` at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now.signed_duration_since(self.built_at) >= ttl
    }

    /// Returns the number of tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the catalog has no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulates per-server results into a [`CatalogSnapshot`].
///
/// Servers must be added in ascending name order. When two servers expose
/// the same tool name the server added later wins; the earlier entry is
/// replaced in place and recorded as shadowed.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entries: Vec<CatalogEntry>,
    shadowed: Vec<ShadowedTool>,
    failures: Vec<ServerRefreshFailure>,
    index: HashMap<String, usize>,
}

impl CatalogBuilder {
    /// Adds the tools one server listed.
    pub fn add_server(
        &mut self,
        server_id: ToolServerId,
        server_name: &ToolServerName,
        tools: Vec<ToolDefinition>,
    ) {
        for tool in tools {
            let entry = CatalogEntry {
                tool,
                server_id,
                server_name: server_name.clone(),
            };
            let name = entry.tool.name().to_owned();
            let existing = self
                .index
                .get(&name)
                .and_then(|position| self.entries.get_mut(*position));
            if let Some(slot) = existing {
                self.shadowed.push(ShadowedTool {
                    tool_name: name,
                    shadowed_server: slot.server_name.clone(),
                    winning_server: server_name.clone(),
                });
                *slot = entry;
            } else {
                self.index.insert(name, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Records a server that contributed nothing.
    pub fn add_failure(
        &mut self,
        server_id: ToolServerId,
        server_name: &ToolServerName,
        message: impl Into<String>,
    ) {
        self.failures.push(ServerRefreshFailure {
            server_id,
            server_name: server_name.clone(),
            message: message.into(),
        });
    }

    /// Finishes the snapshot.
    #[must_use]
    pub fn build(self, built_at: DateTime<Utc>) -> CatalogSnapshot {
        CatalogSnapshot {
            entries: self.entries,
            shadowed: self.shadowed,
            failures: self.failures,
            built_at,
            index: self.index,
        }
    }
}
