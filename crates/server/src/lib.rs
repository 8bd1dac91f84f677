pub mod config;
pub mod logging;
pub mod mcp;

pub use config::ServerConfig;
pub use mcp::git_tool_server::GitToolServer;
