use std::{sync::Arc, time::Duration};

use git_capability::{Backend, CliGit, GitCapability, NativeGit};
use git_facade::GitFacade;
use git_services::{CleanupStrategy, TaskManager, TaskManagerConfig, WorkspaceManager, WorkspaceManagerConfig};
use git_store::GitStore;
use git_vault::CredentialManager;
use rmcp::{transport::stdio, ServiceExt};
use server::{config::ServerConfig, logging, GitToolServer};

fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    let _sentry_guard = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.as_str(),
            sentry::ClientOptions { release: sentry::release_name!(), ..Default::default() },
        ))
    });

    tokio::runtime::Builder::new_multi_thread().enable_all().build()?.block_on(async move {
        logging::init(config.log_level);

        let store = GitStore::open(&config.database_path).await?;

        let workspaces = WorkspaceManager::new(
            WorkspaceManagerConfig {
                root_path: config.workspace_root.clone(),
                max_size_bytes: config.max_workspace_size_bytes,
                retention_seconds: config.result_retention_seconds,
                cleanup_strategy: CleanupStrategy::Lru,
                max_workspaces: config.max_workspaces,
                max_per_workspace_bytes: config.max_per_workspace_bytes,
            },
            store.clone(),
        );
        workspaces.spawn_cleanup_loop();

        let tasks = TaskManager::new(
            TaskManagerConfig {
                max_concurrent_tasks: config.max_concurrent_tasks,
                task_timeout_seconds: config.task_timeout_seconds,
                result_retention_seconds: config.result_retention_seconds,
                cleanup_interval_seconds: config.cleanup_interval_seconds,
            },
            store.clone(),
        );
        tasks.spawn();

        let vault = Arc::new(CredentialManager::new());

        let capability: Arc<dyn GitCapability> = match config.backend {
            Backend::Native => Arc::new(NativeGit::new(vault.get(false))),
            Backend::Cli => Arc::new(CliGit::new("git", Duration::from_secs(config.task_timeout_seconds))),
        };

        let facade = GitFacade::new(store, workspaces, tasks, vault, capability);

        tracing::info!(backend = ?config.backend, workspace_root = %config.workspace_root.display(), "starting git-mcp-server");

        let service = GitToolServer::new(facade).serve(stdio()).await.inspect_err(|e| {
            tracing::error!("serving error: {e:?}");
        })?;
        service.waiting().await?;
        Ok(())
    })
}
