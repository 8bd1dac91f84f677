//! Tracing setup. Every log line is written to stderr — stdout is reserved
//! for the MCP stdio transport — and passes through a secret-redacting
//! writer before it leaves the process. An optional `sentry-tracing` layer
//! forwards errors/panics when `SENTRY_DSN` is configured, mirroring the
//! teacher's `mcp_task_server.rs` bootstrap.

use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::LogLevel;

pub fn init(log_level: LogLevel) {
    let filter = EnvFilter::new(format!("{}", log_level.as_tracing_level()));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(utils::redact::RedactingStderr)
                .with_filter(filter),
        )
        .with(sentry_tracing::layer())
        .init();
}
