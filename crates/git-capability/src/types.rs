//! Request/response types shared by both capability implementations.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Clone,
    Commit,
    Push,
    Pull,
    Fetch,
    Branch,
    Merge,
    Rebase,
    Stash,
    Tag,
    Log,
    Diff,
    Blame,
    Status,
    Add,
    Reset,
    Checkout,
    CherryPick,
    Revert,
    Clean,
}

impl Operation {
    /// clone, fetch, push, pull — the network-bound set that must run
    /// through the retry engine.
    pub fn is_network_bound(self) -> bool {
        matches!(self, Operation::Clone | Operation::Fetch | Operation::Push | Operation::Pull)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Clone => "clone",
            Operation::Commit => "commit",
            Operation::Push => "push",
            Operation::Pull => "pull",
            Operation::Fetch => "fetch",
            Operation::Branch => "branch",
            Operation::Merge => "merge",
            Operation::Rebase => "rebase",
            Operation::Stash => "stash",
            Operation::Tag => "tag",
            Operation::Log => "log",
            Operation::Diff => "diff",
            Operation::Blame => "blame",
            Operation::Status => "status",
            Operation::Add => "add",
            Operation::Reset => "reset",
            Operation::Checkout => "checkout",
            Operation::CherryPick => "cherry_pick",
            Operation::Revert => "revert",
            Operation::Clean => "clean",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CloneOptions {
    pub url: String,
    pub depth: Option<u32>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CommitOptions {
    pub message: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub all: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PushOptions {
    pub remote: Option<String>,
    pub branch: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PullOptions {
    pub remote: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FetchOptions {
    pub remote: Option<String>,
    pub prune: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BranchOptions {
    pub name: String,
    pub checkout: bool,
    pub start_point: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct MergeOptions {
    pub branch: String,
    pub no_ff: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RebaseOptions {
    pub onto: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StashOptions {
    pub message: Option<String>,
    pub pop: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TagOptions {
    pub name: String,
    pub message: Option<String>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct LogOptions {
    pub limit: Option<usize>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DiffOptions {
    pub staged: bool,
    pub against: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BlameOptions {
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StatusOptions {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AddOptions {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    Soft,
    Mixed,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ResetOptions {
    pub target: String,
    pub mode: ResetMode,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            target: "HEAD".to_string(),
            mode: ResetMode::Mixed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CheckoutOptions {
    pub target: String,
    pub create: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CherryPickOptions {
    pub commit: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RevertOptions {
    pub commit: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CleanOptions {
    pub directories: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CommitInfo {
    pub id: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub parent_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GitBranch {
    pub name: String,
    pub is_head: bool,
    pub upstream: Option<String>,
    pub ahead: usize,
    pub behind: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
    Conflicted,
    Typechange,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FileStatus {
    pub path: String,
    pub change_type: ChangeType,
    pub staged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DiffEntry {
    pub path: String,
    pub change_type: ChangeType,
    pub additions: usize,
    pub deletions: usize,
    pub patch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BlameLine {
    pub line_no: usize,
    pub commit_id: String,
    pub author_name: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct MergeResult {
    pub fast_forward: bool,
    pub conflicted_files: Vec<String>,
    pub commit_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PushResult {
    pub remote: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CloneResult {
    pub path: PathBuf,
    pub head_commit: Option<String>,
}
