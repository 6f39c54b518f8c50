//! `PostgreSQL` adapter for shared gateway state.

mod schema;
mod store;

pub use store::PostgresStateStore;
