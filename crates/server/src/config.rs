//! Server-wide configuration, resolved once at startup from the
//! `MCP_GIT_*` environment variables documented in `spec.md` §6.

use std::path::PathBuf;

use git_capability::Backend;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn from_env() -> Self {
        match std::env::var("MCP_GIT_LOG_LEVEL").as_deref() {
            Ok("debug") => LogLevel::Debug,
            Ok("warning") | Ok("warn") => LogLevel::Warning,
            Ok("error") => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub workspace_root: PathBuf,
    pub database_path: String,
    pub server_host: String,
    pub server_port: u16,
    pub log_level: LogLevel,
    pub backend: Backend,
    pub max_concurrent_tasks: usize,
    pub task_timeout_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub result_retention_seconds: i64,
    pub worker_count: usize,
    pub default_clone_depth: Option<u32>,
    pub max_workspace_size_bytes: u64,
    pub max_workspaces: Option<usize>,
    pub max_per_workspace_bytes: Option<u64>,
    pub sentry_dsn: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            workspace_root: std::env::var("MCP_GIT_WORKSPACE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| utils::path::default_workspace_root()),
            database_path: std::env::var("MCP_GIT_DATABASE_PATH")
                .unwrap_or_else(|_| "git_mcp.db".to_string()),
            server_host: std::env::var("MCP_GIT_SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env_or("MCP_GIT_SERVER_PORT", 0u16),
            log_level: LogLevel::from_env(),
            backend: Backend::from_env(),
            max_concurrent_tasks: env_or("MCP_GIT_MAX_CONCURRENT_TASKS", 10usize),
            task_timeout_seconds: env_or("MCP_GIT_TASK_TIMEOUT", 300u64),
            cleanup_interval_seconds: env_or("MCP_GIT_CLEANUP_INTERVAL", 60u64),
            result_retention_seconds: env_or("MCP_GIT_RESULT_RETENTION", 86_400i64),
            worker_count: std::env::var("MCP_GIT_WORKER_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(num_cpus::get),
            default_clone_depth: std::env::var("MCP_GIT_DEFAULT_CLONE_DEPTH").ok().and_then(|v| v.parse().ok()),
            max_workspace_size_bytes: env_or("MCP_GIT_MAX_WORKSPACE_SIZE_BYTES", 10u64 * 1024 * 1024 * 1024),
            max_workspaces: std::env::var("MCP_GIT_MAX_WORKSPACES").ok().and_then(|v| v.parse().ok()),
            max_per_workspace_bytes: std::env::var("MCP_GIT_MAX_PER_WORKSPACE_BYTES").ok().and_then(|v| v.parse().ok()),
            sentry_dsn: std::env::var("SENTRY_DSN").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_defaults_to_info() {
        // SAFETY: test-only, no other test in this process reads this var concurrently.
        unsafe { std::env::remove_var("MCP_GIT_LOG_LEVEL") };
        assert_eq!(LogLevel::from_env().as_tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn warning_maps_to_warn_level() {
        unsafe { std::env::set_var("MCP_GIT_LOG_LEVEL", "warning") };
        assert_eq!(LogLevel::from_env().as_tracing_level(), tracing::Level::WARN);
        unsafe { std::env::remove_var("MCP_GIT_LOG_LEVEL") };
    }
}
