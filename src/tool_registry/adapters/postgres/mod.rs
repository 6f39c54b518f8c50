//! `PostgreSQL` adapters for tool server persistence.

mod models;
mod repository;
mod schema;

pub use repository::{GatewayPgPool, PostgresToolServerRepository};
