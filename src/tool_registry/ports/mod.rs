//! Port contracts for tool server configuration.

mod listener;
mod repository;

pub use listener::{ToolServerChange, ToolServerChangeListener};
pub use repository::{
    ToolServerRepository, ToolServerRepositoryError, ToolServerRepositoryResult,
};
