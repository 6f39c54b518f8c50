//! In-memory adapters for tests and single-process deployments.

mod repository;

pub use repository::InMemoryToolServerRepository;
