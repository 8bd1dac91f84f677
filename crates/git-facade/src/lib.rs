//! The one surface the transport layer calls. Thin composer over the
//! store, workspace/task managers, credential vault, and Git capability —
//! it holds no Git logic of its own.
//!
//! Every exposed method runs the same five-step pipeline: sanitize inputs,
//! resolve the workspace, invoke the capability (retried for network-bound
//! operations), invalidate the external metadata cache on mutation, and
//! kick off an async size recompute for operations that grow the tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use git_capability::{
    AddOptions, BlameLine, BlameOptions, BranchOptions, CheckoutOptions, CherryPickOptions,
    CleanOptions, CloneOptions, CloneResult, CommitInfo, CommitOptions, DiffEntry, DiffOptions,
    FetchOptions, FileStatus, GitBranch, GitCapability, LogOptions, MergeOptions, MergeResult,
    Operation, PullOptions, PushOptions, PushResult, RebaseOptions, ResetOptions, RevertOptions,
    StashOptions, StatusOptions, TagOptions,
};
use git_error::{ErrorKind, GitError};
use git_services::{TaskManager, TaskWork, WorkspaceManager};
use git_store::{GitStore, Task, Workspace};
use git_vault::CredentialManager;
use uuid::Uuid;

/// The facade's view of the cache layer the RPC service sits behind. The
/// cache itself lives outside this crate; the facade only needs to tell it
/// when a workspace's metadata went stale.
#[async_trait]
pub trait MetadataCacheInvalidator: Send + Sync {
    async fn invalidate(&self, workspace_id: Uuid);
}

pub struct NoopCacheInvalidator;

#[async_trait]
impl MetadataCacheInvalidator for NoopCacheInvalidator {
    async fn invalidate(&self, _workspace_id: Uuid) {}
}

#[derive(Clone)]
pub struct GitFacade {
    store: GitStore,
    workspaces: Arc<WorkspaceManager>,
    tasks: Arc<TaskManager>,
    vault: Arc<CredentialManager>,
    capability: Arc<dyn GitCapability>,
    cache: Arc<dyn MetadataCacheInvalidator>,
}

impl GitFacade {
    pub fn new(
        store: GitStore,
        workspaces: Arc<WorkspaceManager>,
        tasks: Arc<TaskManager>,
        vault: Arc<CredentialManager>,
        capability: Arc<dyn GitCapability>,
    ) -> Self {
        Self { store, workspaces, tasks, vault, capability, cache: Arc::new(NoopCacheInvalidator) }
    }

    pub fn with_cache_invalidator(mut self, cache: Arc<dyn MetadataCacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    pub fn store(&self) -> &GitStore {
        &self.store
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn vault(&self) -> &Arc<CredentialManager> {
        &self.vault
    }

    async fn resolve_workspace(&self, workspace_id: Uuid) -> Result<Workspace, GitError> {
        self.workspaces
            .get(workspace_id)
            .await?
            .ok_or_else(|| GitError::repo_not_found(format!("workspace {workspace_id}")))
    }

    async fn on_mutation(&self, workspace_id: Uuid) {
        self.cache.invalidate(workspace_id).await;
    }

    /// Recomputes and persists the workspace's on-disk size in the
    /// background; callers don't wait on this.
    fn spawn_size_update(&self, workspace_id: Uuid) {
        let workspaces = self.workspaces.clone();
        tokio::spawn(async move {
            if let Err(e) = workspaces.update_size(workspace_id, None).await {
                tracing::warn!("async workspace size update failed for {workspace_id}: {e}");
            }
        });
    }

    // ---- per-operation methods -----------------------------------------

    pub async fn clone_repo(&self, workspace_id: Uuid, mut opts: CloneOptions) -> Result<CloneResult, GitError> {
        opts.url = git_sanitize::sanitize_remote_url(&opts.url)?;
        if let Some(branch) = &opts.branch {
            opts.branch = Some(git_sanitize::sanitize_branch_name(branch)?);
        }
        let workspace = self.resolve_workspace(workspace_id).await?;
        let path = PathBuf::from(workspace.path);
        let capability = self.capability.clone();
        let result = git_retry::retry(git_retry::RetryPolicy::Clone.config(), {
            let path = path.clone();
            let opts = opts.clone();
            let capability = capability.clone();
            move || {
                let path = path.clone();
                let opts = opts.clone();
                let capability = capability.clone();
                async move { capability.clone_repo(&path, opts).await }
            }
        })
        .await?;
        self.workspaces.touch(workspace_id).await?;
        self.spawn_size_update(workspace_id);
        Ok(result)
    }

    pub async fn status(&self, workspace_id: Uuid, opts: StatusOptions) -> Result<Vec<FileStatus>, GitError> {
        let path = self.workspace_path(workspace_id).await?;
        self.capability.status(&path, opts).await
    }

    pub async fn add(&self, workspace_id: Uuid, mut opts: AddOptions) -> Result<(), GitError> {
        let path = self.workspace_path(workspace_id).await?;
        for p in &mut opts.paths {
            *p = git_sanitize::sanitize_path(p.as_str(), &path)?.to_string_lossy().into_owned();
        }
        self.capability.add(&path, opts).await
    }

    pub async fn commit(&self, workspace_id: Uuid, mut opts: CommitOptions) -> Result<CommitInfo, GitError> {
        opts.message = git_sanitize::sanitize_commit_message(&opts.message)?;
        let path = self.workspace_path(workspace_id).await?;
        let result = self.capability.commit(&path, opts).await?;
        self.on_mutation(workspace_id).await;
        self.spawn_size_update(workspace_id);
        Ok(result)
    }

    pub async fn push(&self, workspace_id: Uuid, mut opts: PushOptions) -> Result<PushResult, GitError> {
        if let Some(branch) = &opts.branch {
            opts.branch = Some(git_sanitize::sanitize_branch_name(branch)?);
        }
        let path = self.workspace_path(workspace_id).await?;
        let capability = self.capability.clone();
        let result = git_retry::retry(git_retry::RetryPolicy::Network.config(), {
            let path = path.clone();
            let opts = opts.clone();
            let capability = capability.clone();
            move || {
                let path = path.clone();
                let opts = opts.clone();
                let capability = capability.clone();
                async move { capability.push(&path, opts).await }
            }
        })
        .await?;
        self.on_mutation(workspace_id).await;
        Ok(result)
    }

    pub async fn pull(&self, workspace_id: Uuid, mut opts: PullOptions) -> Result<MergeResult, GitError> {
        if let Some(branch) = &opts.branch {
            opts.branch = Some(git_sanitize::sanitize_branch_name(branch)?);
        }
        let path = self.workspace_path(workspace_id).await?;
        let capability = self.capability.clone();
        let result = git_retry::retry(git_retry::RetryPolicy::Network.config(), {
            let path = path.clone();
            let opts = opts.clone();
            let capability = capability.clone();
            move || {
                let path = path.clone();
                let opts = opts.clone();
                let capability = capability.clone();
                async move { capability.pull(&path, opts).await }
            }
        })
        .await?;
        self.on_mutation(workspace_id).await;
        self.spawn_size_update(workspace_id);
        Ok(result)
    }

    pub async fn fetch(&self, workspace_id: Uuid, opts: FetchOptions) -> Result<(), GitError> {
        let path = self.workspace_path(workspace_id).await?;
        let capability = self.capability.clone();
        git_retry::retry(git_retry::RetryPolicy::Network.config(), {
            let path = path.clone();
            let opts = opts.clone();
            let capability = capability.clone();
            move || {
                let path = path.clone();
                let opts = opts.clone();
                let capability = capability.clone();
                async move { capability.fetch(&path, opts).await }
            }
        })
        .await?;
        self.spawn_size_update(workspace_id);
        Ok(())
    }

    pub async fn branch(&self, workspace_id: Uuid, mut opts: BranchOptions) -> Result<GitBranch, GitError> {
        opts.name = git_sanitize::sanitize_branch_name(&opts.name)?;
        if let Some(start_point) = &opts.start_point {
            opts.start_point = Some(git_sanitize::sanitize_branch_name(start_point)?);
        }
        let path = self.workspace_path(workspace_id).await?;
        let result = self.capability.branch(&path, opts).await?;
        self.on_mutation(workspace_id).await;
        Ok(result)
    }

    pub async fn list_branches(&self, workspace_id: Uuid) -> Result<Vec<GitBranch>, GitError> {
        let path = self.workspace_path(workspace_id).await?;
        self.capability.list_branches(&path).await
    }

    pub async fn merge(&self, workspace_id: Uuid, mut opts: MergeOptions) -> Result<MergeResult, GitError> {
        opts.branch = git_sanitize::sanitize_branch_name(&opts.branch)?;
        let path = self.workspace_path(workspace_id).await?;
        let result = self.capability.merge(&path, opts).await?;
        self.spawn_size_update(workspace_id);
        Ok(result)
    }

    pub async fn rebase(&self, workspace_id: Uuid, mut opts: RebaseOptions) -> Result<MergeResult, GitError> {
        opts.onto = git_sanitize::sanitize_branch_name(&opts.onto)?;
        let path = self.workspace_path(workspace_id).await?;
        let result = self.capability.rebase(&path, opts).await?;
        self.spawn_size_update(workspace_id);
        Ok(result)
    }

    pub async fn stash(&self, workspace_id: Uuid, mut opts: StashOptions) -> Result<Option<String>, GitError> {
        if let Some(message) = &opts.message {
            opts.message = Some(git_sanitize::sanitize_input(message));
        }
        let path = self.workspace_path(workspace_id).await?;
        let result = self.capability.stash(&path, opts).await?;
        self.spawn_size_update(workspace_id);
        Ok(result)
    }

    pub async fn tag(&self, workspace_id: Uuid, mut opts: TagOptions) -> Result<(), GitError> {
        opts.name = git_sanitize::sanitize_branch_name(&opts.name)?;
        if let Some(target) = &opts.target {
            opts.target = Some(git_sanitize::sanitize_branch_name(target)?);
        }
        let path = self.workspace_path(workspace_id).await?;
        self.capability.tag(&path, opts).await
    }

    pub async fn log(&self, workspace_id: Uuid, opts: LogOptions) -> Result<Vec<CommitInfo>, GitError> {
        let path = self.workspace_path(workspace_id).await?;
        self.capability.log(&path, opts).await
    }

    pub async fn diff(&self, workspace_id: Uuid, mut opts: DiffOptions) -> Result<Vec<DiffEntry>, GitError> {
        if let Some(against) = &opts.against {
            opts.against = Some(git_sanitize::sanitize_branch_name(against)?);
        }
        let path = self.workspace_path(workspace_id).await?;
        self.capability.diff(&path, opts).await
    }

    pub async fn blame(&self, workspace_id: Uuid, mut opts: BlameOptions) -> Result<Vec<BlameLine>, GitError> {
        let path = self.workspace_path(workspace_id).await?;
        opts.path = git_sanitize::sanitize_path(&opts.path, &path)?.to_string_lossy().into_owned();
        self.capability.blame(&path, opts).await
    }

    pub async fn reset(&self, workspace_id: Uuid, opts: ResetOptions) -> Result<(), GitError> {
        let path = self.workspace_path(workspace_id).await?;
        self.capability.reset(&path, opts).await?;
        self.spawn_size_update(workspace_id);
        Ok(())
    }

    pub async fn checkout(&self, workspace_id: Uuid, mut opts: CheckoutOptions) -> Result<(), GitError> {
        opts.target = git_sanitize::sanitize_branch_name(&opts.target)?;
        let path = self.workspace_path(workspace_id).await?;
        self.capability.checkout(&path, opts).await?;
        self.on_mutation(workspace_id).await;
        self.spawn_size_update(workspace_id);
        Ok(())
    }

    pub async fn cherry_pick(&self, workspace_id: Uuid, mut opts: CherryPickOptions) -> Result<CommitInfo, GitError> {
        opts.commit = git_sanitize::sanitize_branch_name(&opts.commit)?;
        let path = self.workspace_path(workspace_id).await?;
        let result = self.capability.cherry_pick(&path, opts).await?;
        self.spawn_size_update(workspace_id);
        Ok(result)
    }

    pub async fn revert(&self, workspace_id: Uuid, mut opts: RevertOptions) -> Result<CommitInfo, GitError> {
        opts.commit = git_sanitize::sanitize_branch_name(&opts.commit)?;
        let path = self.workspace_path(workspace_id).await?;
        let result = self.capability.revert(&path, opts).await?;
        self.spawn_size_update(workspace_id);
        Ok(result)
    }

    pub async fn clean(&self, workspace_id: Uuid, opts: CleanOptions) -> Result<Vec<String>, GitError> {
        let path = self.workspace_path(workspace_id).await?;
        let result = self.capability.clean(&path, opts).await?;
        self.spawn_size_update(workspace_id);
        Ok(result)
    }

    async fn workspace_path(&self, workspace_id: Uuid) -> Result<PathBuf, GitError> {
        Ok(PathBuf::from(self.resolve_workspace(workspace_id).await?.path))
    }

    // ---- async task creation --------------------------------------------

    /// Creates a task for `op` against `workspace_id` and submits it to the
    /// task manager for admission-controlled, async execution. The caller
    /// polls completion via `tasks().get_task(id)`.
    pub async fn create_git_task(
        &self,
        op: Operation,
        workspace_id: Uuid,
        params: serde_json::Value,
        priority: i32,
    ) -> Result<Task, GitError> {
        let workspace = self.resolve_workspace(workspace_id).await?;
        let task = self
            .tasks
            .create_task(op.as_str(), params.clone(), Some(workspace.path), priority)
            .await?;

        let facade = self.clone();
        let work: TaskWork = Box::pin(async move {
            facade.dispatch_operation(op, workspace_id, params).await
        });
        self.tasks.submit_task(task.id, work).await?;
        Ok(task)
    }

    async fn dispatch_operation(
        &self,
        op: Operation,
        workspace_id: Uuid,
        params: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, GitError> {
        macro_rules! run {
            ($method:ident) => {{
                let opts = parse_params(params)?;
                let result = self.$method(workspace_id, opts).await?;
                to_value(result)
            }};
        }

        let value = match op {
            Operation::Clone => run!(clone_repo),
            Operation::Status => run!(status),
            Operation::Add => {
                let opts = parse_params(params)?;
                self.add(workspace_id, opts).await?;
                None
            }
            Operation::Commit => run!(commit),
            Operation::Push => run!(push),
            Operation::Pull => run!(pull),
            Operation::Fetch => {
                let opts = parse_params(params)?;
                self.fetch(workspace_id, opts).await?;
                None
            }
            Operation::Branch => run!(branch),
            Operation::Merge => run!(merge),
            Operation::Rebase => run!(rebase),
            Operation::Stash => run!(stash),
            Operation::Tag => {
                let opts = parse_params(params)?;
                self.tag(workspace_id, opts).await?;
                None
            }
            Operation::Log => run!(log),
            Operation::Diff => run!(diff),
            Operation::Blame => run!(blame),
            Operation::Reset => {
                let opts = parse_params(params)?;
                self.reset(workspace_id, opts).await?;
                None
            }
            Operation::Checkout => {
                let opts = parse_params(params)?;
                self.checkout(workspace_id, opts).await?;
                None
            }
            Operation::CherryPick => run!(cherry_pick),
            Operation::Revert => run!(revert),
            Operation::Clean => run!(clean),
        };
        Ok(value)
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, GitError> {
    serde_json::from_value(params).map_err(|e| {
        GitError::new(ErrorKind::MissingRequiredParam, format!("invalid task parameters: {e}"))
    })
}

fn to_value<T: serde::Serialize>(value: T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use git_capability::NativeGit;
    use git_services::{TaskManagerConfig, WorkspaceManagerConfig};

    async fn make_facade(root: &Path) -> GitFacade {
        let store = GitStore::open_in_memory().await.unwrap();
        let workspaces = WorkspaceManager::new(
            WorkspaceManagerConfig {
                root_path: root.to_path_buf(),
                max_size_bytes: 10 * 1024 * 1024 * 1024,
                retention_seconds: 3600,
                cleanup_strategy: git_services::CleanupStrategy::Lru,
                max_workspaces: None,
                max_per_workspace_bytes: None,
            },
            store.clone(),
        );
        let tasks = TaskManager::new(
            TaskManagerConfig {
                max_concurrent_tasks: 4,
                task_timeout_seconds: 300,
                result_retention_seconds: 3600,
                cleanup_interval_seconds: 300,
            },
            store.clone(),
        );
        let vault = Arc::new(CredentialManager::new());
        let capability: Arc<dyn GitCapability> = Arc::new(NativeGit::new(None));
        GitFacade::new(store, workspaces, tasks, vault, capability)
    }

    #[tokio::test]
    async fn clone_into_missing_workspace_fails_with_repo_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let facade = make_facade(dir.path()).await;
        let err = facade
            .clone_repo(Uuid::new_v4(), CloneOptions { url: "https://example.com/repo.git".into(), depth: None, branch: None })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RepoNotFound);
    }

    #[tokio::test]
    async fn commit_rejects_empty_message_before_resolving_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let facade = make_facade(dir.path()).await;
        let err = facade
            .commit(Uuid::new_v4(), CommitOptions { message: "   ".into(), ..Default::default() })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCommitMessage);
    }

    #[tokio::test]
    async fn create_git_task_for_unknown_workspace_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let facade = make_facade(dir.path()).await;
        let err = facade
            .create_git_task(Operation::Status, Uuid::new_v4(), serde_json::json!({}), 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RepoNotFound);
    }
}
