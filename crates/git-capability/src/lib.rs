//! Abstract Git operation set with two interchangeable implementations: a
//! native one built on `git2`, and a shell-out one that spawns the `git`
//! binary. Both satisfy [`GitCapability`]; callers pick one at construction
//! time.

pub mod cli;
pub mod native;
pub mod types;

use async_trait::async_trait;
use git_error::GitError;

pub use cli::CliGit;
pub use native::NativeGit;
pub use types::*;

/// One method per operation in the Task entity's `operation` enum. Each
/// takes a workspace path plus an operation-specific options record and
/// returns a typed result or a [`GitError`] whose `kind` classifies the
/// failure per the shared taxonomy.
#[async_trait]
pub trait GitCapability: Send + Sync {
    async fn clone_repo(&self, workspace_path: &std::path::Path, opts: CloneOptions) -> Result<CloneResult, GitError>;
    async fn status(&self, workspace_path: &std::path::Path, opts: StatusOptions) -> Result<Vec<FileStatus>, GitError>;
    async fn add(&self, workspace_path: &std::path::Path, opts: AddOptions) -> Result<(), GitError>;
    async fn commit(&self, workspace_path: &std::path::Path, opts: CommitOptions) -> Result<CommitInfo, GitError>;
    async fn push(&self, workspace_path: &std::path::Path, opts: PushOptions) -> Result<PushResult, GitError>;
    async fn pull(&self, workspace_path: &std::path::Path, opts: PullOptions) -> Result<MergeResult, GitError>;
    async fn fetch(&self, workspace_path: &std::path::Path, opts: FetchOptions) -> Result<(), GitError>;
    async fn branch(&self, workspace_path: &std::path::Path, opts: BranchOptions) -> Result<GitBranch, GitError>;
    async fn list_branches(&self, workspace_path: &std::path::Path) -> Result<Vec<GitBranch>, GitError>;
    async fn merge(&self, workspace_path: &std::path::Path, opts: MergeOptions) -> Result<MergeResult, GitError>;
    async fn rebase(&self, workspace_path: &std::path::Path, opts: RebaseOptions) -> Result<MergeResult, GitError>;
    async fn stash(&self, workspace_path: &std::path::Path, opts: StashOptions) -> Result<Option<String>, GitError>;
    async fn tag(&self, workspace_path: &std::path::Path, opts: TagOptions) -> Result<(), GitError>;
    async fn log(&self, workspace_path: &std::path::Path, opts: LogOptions) -> Result<Vec<CommitInfo>, GitError>;
    async fn diff(&self, workspace_path: &std::path::Path, opts: DiffOptions) -> Result<Vec<DiffEntry>, GitError>;
    async fn blame(&self, workspace_path: &std::path::Path, opts: BlameOptions) -> Result<Vec<BlameLine>, GitError>;
    async fn reset(&self, workspace_path: &std::path::Path, opts: ResetOptions) -> Result<(), GitError>;
    async fn checkout(&self, workspace_path: &std::path::Path, opts: CheckoutOptions) -> Result<(), GitError>;
    async fn cherry_pick(&self, workspace_path: &std::path::Path, opts: CherryPickOptions) -> Result<CommitInfo, GitError>;
    async fn revert(&self, workspace_path: &std::path::Path, opts: RevertOptions) -> Result<CommitInfo, GitError>;
    async fn clean(&self, workspace_path: &std::path::Path, opts: CleanOptions) -> Result<Vec<String>, GitError>;
}

/// Which [`GitCapability`] implementation the facade should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Native,
    Cli,
}

impl Backend {
    pub fn from_env() -> Self {
        match std::env::var("MCP_GIT_BACKEND").as_deref() {
            Ok("cli") => Backend::Cli,
            _ => Backend::Native,
        }
    }
}
