//! Application services for tool server configuration.

mod registry;

pub use registry::{
    RegisterToolServerRequest, ToolServerRegistryService, ToolServerRegistryServiceError,
    ToolServerRegistryServiceResult,
};
