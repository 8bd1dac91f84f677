//! Exposes [`GitFacade`]'s operation set as `rmcp` tools, one per `Operation`
//! plus workspace lifecycle and async task-management tools. Follows the
//! teacher's `TaskServer` shape: a struct holding the domain service plus a
//! `ToolRouter`, a `#[tool_router]` impl with one `#[tool]`-annotated method
//! per capability, and a `#[tool_handler]` `ServerHandler` impl.

use git_capability::{
    AddOptions, BlameOptions, BranchOptions, CheckoutOptions, CherryPickOptions, CleanOptions,
    CloneOptions, CommitOptions, DiffOptions, FetchOptions, LogOptions, MergeOptions, Operation,
    PullOptions, PushOptions, RebaseOptions, ResetOptions, RevertOptions, StashOptions,
    StatusOptions, TagOptions,
};
use git_error::{ErrorKind, GitError};
use git_facade::GitFacade;
use git_store::{Task, TaskStatus, Workspace};
use rmcp::{
    handler::server::tool::{Parameters, ToolRouter},
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    schemars, tool, tool_handler, tool_router, ErrorData, ServerHandler,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn parse_workspace_id(raw: &str) -> Result<Uuid, GitError> {
    Uuid::parse_str(raw)
        .map_err(|_| GitError::new(ErrorKind::InvalidRepoPath, format!("invalid workspace_id: {raw}")))
}

fn parse_operation(raw: &str) -> Result<Operation, GitError> {
    for op in [
        Operation::Clone, Operation::Commit, Operation::Push, Operation::Pull, Operation::Fetch,
        Operation::Branch, Operation::Merge, Operation::Rebase, Operation::Stash, Operation::Tag,
        Operation::Log, Operation::Diff, Operation::Blame, Operation::Status, Operation::Add,
        Operation::Reset, Operation::Checkout, Operation::CherryPick, Operation::Revert, Operation::Clean,
    ] {
        if op.as_str() == raw {
            return Ok(op);
        }
    }
    Err(GitError::new(ErrorKind::MissingRequiredParam, format!("unknown operation: {raw}")))
}

fn respond<T: Serialize>(result: Result<T, GitError>) -> CallToolResult {
    match result {
        Ok(value) => CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| "null".to_string()),
        )]),
        Err(err) => CallToolResult::error(vec![Content::text(
            serde_json::to_string_pretty(&err.to_dict()).unwrap_or_else(|_| err.message.clone()),
        )]),
    }
}

fn workspace_view(ws: Workspace) -> WorkspaceView {
    WorkspaceView {
        id: ws.id.to_string(),
        path: ws.path,
        size_bytes: ws.size_bytes,
        created_at: ws.created_at.to_rfc3339(),
        last_accessed_at: ws.last_accessed_at.to_rfc3339(),
    }
}

fn task_view(task: Task) -> TaskView {
    TaskView {
        id: task.id.to_string(),
        operation: task.operation,
        status: task.status.to_string(),
        workspace_path: task.workspace_path,
        result: task.result,
        error_message: task.error_message,
        progress: task.progress,
        priority: task.priority,
        created_at: task.created_at.to_rfc3339(),
        started_at: task.started_at.map(|t| t.to_rfc3339()),
        completed_at: task.completed_at.map(|t| t.to_rfc3339()),
    }
}

#[derive(Debug, Serialize)]
pub struct WorkspaceView {
    pub id: String,
    pub path: String,
    pub size_bytes: i64,
    pub created_at: String,
    pub last_accessed_at: String,
}

#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: String,
    pub operation: String,
    pub status: String,
    pub workspace_path: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub progress: i32,
    pub priority: i32,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

macro_rules! with_opts_request {
    ($name:ident, $opts:ty, $doc:literal) => {
        #[derive(Debug, Deserialize, schemars::JsonSchema)]
        pub struct $name {
            #[schemars(description = "The id of the workspace (returned by allocate_workspace) to operate on")]
            pub workspace_id: String,
            #[serde(flatten)]
            #[schemars(description = $doc)]
            pub opts: $opts,
        }
    };
}

with_opts_request!(CloneRequest, CloneOptions, "Clone options: url, optional branch, optional depth");
with_opts_request!(StatusRequest, StatusOptions, "Status options (currently none)");
with_opts_request!(AddRequest, AddOptions, "Paths to stage, relative to the workspace root");
with_opts_request!(CommitRequest, CommitOptions, "Commit message and optional author override");
with_opts_request!(PushRequest, PushOptions, "Optional remote/branch override and force flag");
with_opts_request!(PullRequest, PullOptions, "Optional remote/branch override");
with_opts_request!(FetchRequest, FetchOptions, "Optional remote override and prune flag");
with_opts_request!(BranchRequest, BranchOptions, "Branch name, optional start point, whether to check it out");
with_opts_request!(MergeRequest, MergeOptions, "Branch to merge and whether to force a merge commit");
with_opts_request!(RebaseRequest, RebaseOptions, "Branch to rebase onto");
with_opts_request!(StashRequest, StashOptions, "Optional stash message, or pop the most recent stash");
with_opts_request!(TagRequest, TagOptions, "Tag name, optional message and target commit");
with_opts_request!(LogRequest, LogOptions, "Optional commit limit and path filter");
with_opts_request!(DiffRequest, DiffOptions, "Optional staged flag, comparison ref, and path filter");
with_opts_request!(BlameRequest, BlameOptions, "Path to blame");
with_opts_request!(ResetRequest, ResetOptions, "Target ref and reset mode (soft/mixed/hard)");
with_opts_request!(CheckoutRequest, CheckoutOptions, "Target branch/ref and whether to create it");
with_opts_request!(CherryPickRequest, CherryPickOptions, "Commit to cherry-pick");
with_opts_request!(RevertRequest, RevertOptions, "Commit to revert");
with_opts_request!(CleanRequest, CleanOptions, "Whether to remove untracked directories and force-delete");

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct WorkspaceIdRequest {
    #[schemars(description = "The id of the workspace")]
    pub workspace_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListWorkspacesRequest {
    #[schemars(description = "Maximum number of workspaces to return (default: 50)")]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CreateTaskRequest {
    #[schemars(description = "Operation name: clone, commit, push, pull, fetch, branch, merge, rebase, stash, tag, log, diff, blame, status, add, reset, checkout, cherry_pick, revert, clean")]
    pub operation: String,
    #[schemars(description = "The id of the workspace to run the operation against")]
    pub workspace_id: String,
    #[schemars(description = "Operation-specific parameters, matching the corresponding sync tool's fields")]
    pub params: serde_json::Value,
    #[schemars(description = "Higher values are admitted first when tasks queue; ties break FIFO (default: 0)")]
    pub priority: Option<i32>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TaskIdRequest {
    #[schemars(description = "The task id returned by create_task")]
    pub task_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListTasksRequest {
    #[schemars(description = "Optional status filter: queued, running, completed, failed, cancelled")]
    pub status: Option<String>,
    #[schemars(description = "Maximum number of tasks to return (default: 50)")]
    pub limit: Option<i64>,
}

fn parse_task_id(raw: &str) -> Result<Uuid, GitError> {
    Uuid::parse_str(raw).map_err(|_| GitError::new(ErrorKind::MissingRequiredParam, format!("invalid task_id: {raw}")))
}

fn parse_task_status(raw: &str) -> Option<TaskStatus> {
    match raw.to_lowercase().as_str() {
        "queued" => Some(TaskStatus::Queued),
        "running" => Some(TaskStatus::Running),
        "completed" => Some(TaskStatus::Completed),
        "failed" => Some(TaskStatus::Failed),
        "cancelled" | "canceled" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}

#[derive(Clone)]
pub struct GitToolServer {
    facade: GitFacade,
    tool_router: ToolRouter<GitToolServer>,
}

impl GitToolServer {
    pub fn new(facade: GitFacade) -> Self {
        Self { facade, tool_router: Self::tool_router() }
    }
}

#[tool_router]
impl GitToolServer {
    #[tool(description = "Allocate a new, empty workspace directory. Returns its workspace_id.")]
    async fn allocate_workspace(&self) -> Result<CallToolResult, ErrorData> {
        Ok(respond(self.facade.workspaces().allocate().await.map(workspace_view)))
    }

    #[tool(description = "Fetch a workspace's metadata by id.")]
    async fn get_workspace(
        &self,
        Parameters(WorkspaceIdRequest { workspace_id }): Parameters<WorkspaceIdRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        let result = self.facade.workspaces().get(id).await;
        Ok(match result {
            Ok(Some(ws)) => respond(Ok(workspace_view(ws))),
            Ok(None) => respond::<()>(Err(GitError::repo_not_found(format!("workspace {id}")))),
            Err(e) => respond::<()>(Err(e)),
        })
    }

    #[tool(description = "List known workspaces, most recently accessed first.")]
    async fn list_workspaces(
        &self,
        Parameters(ListWorkspacesRequest { limit }): Parameters<ListWorkspacesRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = self.facade.workspaces().list(limit.unwrap_or(50)).await;
        Ok(respond(result.map(|ws| ws.into_iter().map(workspace_view).collect::<Vec<_>>())))
    }

    #[tool(
        description = "Delete a workspace's directory and record. Idempotent: returns whether it actually existed."
    )]
    async fn release_workspace(
        &self,
        Parameters(WorkspaceIdRequest { workspace_id }): Parameters<WorkspaceIdRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.workspaces().release(id).await))
    }

    #[tool(description = "Clone a remote repository into a workspace.")]
    async fn clone_repo(
        &self,
        Parameters(CloneRequest { workspace_id, opts }): Parameters<CloneRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.clone_repo(id, opts).await))
    }

    #[tool(description = "Report the working tree and index status of a workspace.")]
    async fn status(
        &self,
        Parameters(StatusRequest { workspace_id, opts }): Parameters<StatusRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.status(id, opts).await))
    }

    #[tool(description = "Stage one or more paths.")]
    async fn add(
        &self,
        Parameters(AddRequest { workspace_id, opts }): Parameters<AddRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.add(id, opts).await))
    }

    #[tool(description = "Create a commit from the currently staged changes.")]
    async fn commit(
        &self,
        Parameters(CommitRequest { workspace_id, opts }): Parameters<CommitRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.commit(id, opts).await))
    }

    #[tool(description = "Push the current branch to its remote.")]
    async fn push(
        &self,
        Parameters(PushRequest { workspace_id, opts }): Parameters<PushRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.push(id, opts).await))
    }

    #[tool(description = "Pull and merge the current branch's remote-tracking branch.")]
    async fn pull(
        &self,
        Parameters(PullRequest { workspace_id, opts }): Parameters<PullRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.pull(id, opts).await))
    }

    #[tool(description = "Fetch from a remote without merging.")]
    async fn fetch(
        &self,
        Parameters(FetchRequest { workspace_id, opts }): Parameters<FetchRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.fetch(id, opts).await))
    }

    #[tool(description = "Create a branch, optionally checking it out.")]
    async fn branch(
        &self,
        Parameters(BranchRequest { workspace_id, opts }): Parameters<BranchRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.branch(id, opts).await))
    }

    #[tool(description = "List branches in a workspace.")]
    async fn list_branches(
        &self,
        Parameters(WorkspaceIdRequest { workspace_id }): Parameters<WorkspaceIdRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.list_branches(id).await))
    }

    #[tool(description = "Merge a branch into the current branch.")]
    async fn merge(
        &self,
        Parameters(MergeRequest { workspace_id, opts }): Parameters<MergeRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.merge(id, opts).await))
    }

    #[tool(description = "Rebase the current branch onto another ref.")]
    async fn rebase(
        &self,
        Parameters(RebaseRequest { workspace_id, opts }): Parameters<RebaseRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.rebase(id, opts).await))
    }

    #[tool(description = "Stash the working tree, or pop the most recent stash.")]
    async fn stash(
        &self,
        Parameters(StashRequest { workspace_id, opts }): Parameters<StashRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.stash(id, opts).await))
    }

    #[tool(description = "Create a tag.")]
    async fn tag(
        &self,
        Parameters(TagRequest { workspace_id, opts }): Parameters<TagRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.tag(id, opts).await))
    }

    #[tool(description = "List commits reachable from HEAD.")]
    async fn log(
        &self,
        Parameters(LogRequest { workspace_id, opts }): Parameters<LogRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.log(id, opts).await))
    }

    #[tool(description = "Show a diff against the working tree, index, or another ref.")]
    async fn diff(
        &self,
        Parameters(DiffRequest { workspace_id, opts }): Parameters<DiffRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.diff(id, opts).await))
    }

    #[tool(description = "Blame a file, line by line.")]
    async fn blame(
        &self,
        Parameters(BlameRequest { workspace_id, opts }): Parameters<BlameRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.blame(id, opts).await))
    }

    #[tool(description = "Reset the current branch to a ref (soft, mixed, or hard).")]
    async fn reset(
        &self,
        Parameters(ResetRequest { workspace_id, opts }): Parameters<ResetRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.reset(id, opts).await))
    }

    #[tool(description = "Check out a branch, tag, or commit, optionally creating the branch.")]
    async fn checkout(
        &self,
        Parameters(CheckoutRequest { workspace_id, opts }): Parameters<CheckoutRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.checkout(id, opts).await))
    }

    #[tool(description = "Cherry-pick a commit onto the current branch.")]
    async fn cherry_pick(
        &self,
        Parameters(CherryPickRequest { workspace_id, opts }): Parameters<CherryPickRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.cherry_pick(id, opts).await))
    }

    #[tool(description = "Revert a commit, creating a new commit that undoes it.")]
    async fn revert(
        &self,
        Parameters(RevertRequest { workspace_id, opts }): Parameters<RevertRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.revert(id, opts).await))
    }

    #[tool(description = "Remove untracked files from the working tree.")]
    async fn clean(
        &self,
        Parameters(CleanRequest { workspace_id, opts }): Parameters<CleanRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.clean(id, opts).await))
    }

    #[tool(
        description = "Submit an operation to run asynchronously under the task manager's concurrency cap. Returns a task_id to poll with get_task."
    )]
    async fn create_task(
        &self,
        Parameters(CreateTaskRequest { operation, workspace_id, params, priority }): Parameters<CreateTaskRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_workspace_id(&workspace_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        let op = match parse_operation(&operation) {
            Ok(op) => op,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        let result = self.facade.create_git_task(op, id, params, priority.unwrap_or(0)).await;
        Ok(respond(result.map(task_view)))
    }

    #[tool(description = "Fetch a task's current status, progress, and result (if completed).")]
    async fn get_task(
        &self,
        Parameters(TaskIdRequest { task_id }): Parameters<TaskIdRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_task_id(&task_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        let result = self.facade.tasks().get_task(id).await;
        Ok(match result {
            Ok(Some(task)) => respond(Ok(task_view(task))),
            Ok(None) => respond::<()>(Err(GitError::task_not_found(id.to_string()))),
            Err(e) => respond::<()>(Err(e)),
        })
    }

    #[tool(description = "List tasks, most recently created first, with an optional status filter.")]
    async fn list_tasks(
        &self,
        Parameters(ListTasksRequest { status, limit }): Parameters<ListTasksRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let status_filter = match &status {
            Some(s) => match parse_task_status(s) {
                Some(status) => Some(status),
                None => {
                    return Ok(respond::<()>(Err(GitError::new(
                        ErrorKind::MissingRequiredParam,
                        format!("invalid status filter: {s}"),
                    ))))
                }
            },
            None => None,
        };
        let result = self.facade.tasks().list_tasks(status_filter, limit.unwrap_or(50), 0).await;
        Ok(respond(result.map(|tasks| tasks.into_iter().map(task_view).collect::<Vec<_>>())))
    }

    #[tool(
        description = "Cancel a task. Idempotent: returns true on the call that transitions it to cancelled, false otherwise."
    )]
    async fn cancel_task(
        &self,
        Parameters(TaskIdRequest { task_id }): Parameters<TaskIdRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let id = match parse_task_id(&task_id) {
            Ok(id) => id,
            Err(e) => return Ok(respond::<()>(Err(e))),
        };
        Ok(respond(self.facade.tasks().cancel_task(id).await))
    }
}

#[tool_handler]
impl ServerHandler for GitToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation { name: "git-mcp-server".to_string(), version: env!("CARGO_PKG_VERSION").to_string() },
            instructions: Some(
                "Exposes Git repository operations over MCP. Call allocate_workspace first to \
                 get a workspace_id, then clone_repo (or point an existing checkout at it) before \
                 running other operations. Mutating operations run synchronously by default; use \
                 create_task/get_task for fire-and-forget execution under the server's concurrency \
                 cap. Call release_workspace when done."
                    .to_string(),
            ),
        }
    }
}
