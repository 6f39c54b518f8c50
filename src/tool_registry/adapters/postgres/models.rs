//! Diesel row models for tool server persistence.

use super::schema::tool_servers;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for tool server records.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tool_servers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ToolServerRow {
    /// Internal server identifier.
    pub id: uuid::Uuid,
    /// Unique server name.
    pub name: String,
    /// Connection descriptor payload.
    pub transport: Value,
    /// Enabled flag.
    pub enabled: bool,
    /// Last-known status.
    pub status: String,
    /// Last error message.
    pub last_error: Option<String>,
    /// Status observation timestamp.
    pub status_observed_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Insert model for tool server records.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = tool_servers)]
pub struct NewToolServerRow {
    /// Internal server identifier.
    pub id: uuid::Uuid,
    /// Unique server name.
    pub name: String,
    /// Connection descriptor payload.
    pub transport: Value,
    /// Enabled flag.
    pub enabled: bool,
    /// Last-known status.
    pub status: String,
    /// Last error message.
    #[diesel(treat_none_as_null = true)]
    pub last_error: Option<String>,
    /// Status observation timestamp.
    pub status_observed_at: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}
