//! Shell-out implementation: spawns the `git` binary, sanitizing every
//! argument first and mapping non-zero exit codes to error kinds by
//! scanning stderr for characteristic phrases.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use git_error::{ErrorContext, ErrorKind, GitError};
use git_sanitize::check_command_injection;
use tokio::process::Command;

use crate::types::*;
use crate::GitCapability;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

pub struct CliGit {
    git_binary: String,
    timeout: Duration,
}

impl Default for CliGit {
    fn default() -> Self {
        Self {
            git_binary: "git".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl CliGit {
    pub fn new(git_binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            git_binary: git_binary.into(),
            timeout,
        }
    }

    async fn run(&self, workspace_path: &Path, args: &[&str], operation: &str) -> Result<String, GitError> {
        for arg in args {
            check_command_injection(arg).map_err(|e| {
                GitError::new(ErrorKind::ParameterConflict, e.to_string())
                    .with_context(ErrorContext::new(operation))
            })?;
        }

        // Spawning can fail transiently under load (EAGAIN/ENOMEM from fork());
        // since no process exists yet on failure, retrying is always safe,
        // unlike retrying the git invocation itself once it has started.
        let spawn = || async {
            Command::new(&self.git_binary)
                .args(args)
                .current_dir(workspace_path)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
        };

        let child = spawn
            .retry(ExponentialBuilder::default().with_max_times(2))
            .notify(|err, dur| tracing::warn!("git spawn failed, retrying in {dur:?}: {err}"))
            .await
            .map_err(|e| {
                GitError::new(ErrorKind::SystemError, format!("failed to spawn git: {e}"))
                    .with_context(ErrorContext::new(operation))
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| GitError::new(ErrorKind::Timeout, format!("git {operation} timed out")))?
            .map_err(|e| GitError::new(ErrorKind::SystemError, format!("failed to read git output: {e}")))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        Err(map_stderr(&stderr, operation))
    }

    async fn run_lines(&self, workspace_path: &Path, args: &[&str], operation: &str) -> Result<Vec<String>, GitError> {
        let stdout = self.run(workspace_path, args, operation).await?;
        Ok(stdout.lines().map(str::to_string).collect())
    }
}

/// "authentication failed" -> auth; "not found"/"does not exist" ->
/// repo-not-found; "conflict" -> merge conflict (with conflicted-file
/// extraction from `git status --porcelain`-style `UU` markers if present
/// in stderr); "unknown revision" -> git-operation error; else generic.
fn map_stderr(stderr: &str, operation: &str) -> GitError {
    let lower = stderr.to_lowercase();
    let base = GitError::new(ErrorKind::GitCommandFailed, format!("git {operation} failed"))
        .with_details(stderr.to_string())
        .with_context(ErrorContext::new(operation));

    if lower.contains("authentication failed") || lower.contains("permission denied (publickey)") {
        return GitError::new(ErrorKind::AuthFailed, "git authentication failed")
            .with_details(stderr.to_string())
            .with_context(ErrorContext::new(operation));
    }
    if lower.contains("not found") || lower.contains("does not exist") {
        return GitError::new(ErrorKind::RepoNotFound, format!("repository not found during {operation}"))
            .with_details(stderr.to_string())
            .with_context(ErrorContext::new(operation));
    }
    if lower.contains("conflict") {
        let conflicted: Vec<String> = stderr
            .lines()
            .filter(|l| l.trim_start().starts_with("CONFLICT"))
            .map(str::to_string)
            .collect();
        return GitError::merge_conflict(&conflicted).with_context(ErrorContext::new(operation));
    }
    if lower.contains("unknown revision") {
        return GitError::new(ErrorKind::GitCommandFailed, format!("unknown revision in {operation}"))
            .with_details(stderr.to_string())
            .with_context(ErrorContext::new(operation));
    }
    if lower.contains("rejected") && lower.contains("push") {
        return GitError::new(ErrorKind::GitPushRejected, "push rejected by remote")
            .with_details(stderr.to_string())
            .with_context(ErrorContext::new(operation));
    }
    base
}

#[async_trait]
impl GitCapability for CliGit {
    async fn clone_repo(&self, workspace_path: &Path, opts: CloneOptions) -> Result<CloneResult, GitError> {
        let depth_str = opts.depth.map(|d| d.to_string());
        let mut args = vec!["clone"];
        if let Some(depth) = &depth_str {
            args.push("--depth");
            args.push(depth);
        }
        if let Some(branch) = &opts.branch {
            args.push("--branch");
            args.push(branch);
        }
        args.push(&opts.url);
        args.push(".");

        let parent = workspace_path
            .parent()
            .unwrap_or(workspace_path);
        std::fs::create_dir_all(workspace_path).map_err(|e| {
            GitError::new(ErrorKind::SystemError, format!("failed to create workspace directory: {e}"))
        })?;
        let _ = parent;
        self.run(workspace_path, &args, "clone").await?;

        let head = self.run(workspace_path, &["rev-parse", "HEAD"], "clone").await.ok();
        Ok(CloneResult {
            path: workspace_path.to_path_buf(),
            head_commit: head.map(|s| s.trim().to_string()),
        })
    }

    async fn status(&self, workspace_path: &Path, _opts: StatusOptions) -> Result<Vec<FileStatus>, GitError> {
        let lines = self
            .run_lines(workspace_path, &["status", "--porcelain=v1"], "status")
            .await?;
        Ok(lines
            .iter()
            .filter(|l| !l.is_empty())
            .filter_map(|line| parse_porcelain_line(line))
            .collect())
    }

    async fn add(&self, workspace_path: &Path, opts: AddOptions) -> Result<(), GitError> {
        let mut args = vec!["add"];
        if opts.paths.is_empty() {
            args.push("-A");
        } else {
            for path in &opts.paths {
                args.push(path);
            }
        }
        self.run(workspace_path, &args, "add").await?;
        Ok(())
    }

    async fn commit(&self, workspace_path: &Path, opts: CommitOptions) -> Result<CommitInfo, GitError> {
        let mut args = vec!["commit", "-m", &opts.message];
        if opts.all {
            args.push("-a");
        }
        self.run(workspace_path, &args, "commit").await?;
        let id = self.run(workspace_path, &["rev-parse", "HEAD"], "commit").await?;
        self.commit_info(workspace_path, id.trim()).await
    }

    async fn push(&self, workspace_path: &Path, opts: PushOptions) -> Result<PushResult, GitError> {
        let remote = opts.remote.clone().unwrap_or_else(|| "origin".to_string());
        let branch = match &opts.branch {
            Some(b) => b.clone(),
            None => self.run(workspace_path, &["rev-parse", "--abbrev-ref", "HEAD"], "push").await?.trim().to_string(),
        };
        let mut args = vec!["push", remote.as_str(), branch.as_str()];
        if opts.force {
            args.insert(1, "--force");
        }
        self.run(workspace_path, &args, "push").await?;
        Ok(PushResult { remote, branch })
    }

    async fn pull(&self, workspace_path: &Path, opts: PullOptions) -> Result<MergeResult, GitError> {
        let remote = opts.remote.clone().unwrap_or_else(|| "origin".to_string());
        let mut args = vec!["pull", remote.as_str()];
        if let Some(branch) = &opts.branch {
            args.push(branch);
        }
        self.run(workspace_path, &args, "pull").await?;
        let id = self.run(workspace_path, &["rev-parse", "HEAD"], "pull").await?;
        Ok(MergeResult {
            fast_forward: true,
            conflicted_files: Vec::new(),
            commit_id: Some(id.trim().to_string()),
        })
    }

    async fn fetch(&self, workspace_path: &Path, opts: FetchOptions) -> Result<(), GitError> {
        let remote = opts.remote.clone().unwrap_or_else(|| "origin".to_string());
        let mut args = vec!["fetch", remote.as_str()];
        if opts.prune {
            args.push("--prune");
        }
        self.run(workspace_path, &args, "fetch").await?;
        Ok(())
    }

    async fn branch(&self, workspace_path: &Path, opts: BranchOptions) -> Result<GitBranch, GitError> {
        let mut args = vec!["branch", opts.name.as_str()];
        if let Some(start) = &opts.start_point {
            args.push(start);
        }
        self.run(workspace_path, &args, "branch").await?;
        if opts.checkout {
            self.run(workspace_path, &["checkout", &opts.name], "branch").await?;
        }
        Ok(GitBranch {
            name: opts.name,
            is_head: opts.checkout,
            upstream: None,
            ahead: 0,
            behind: 0,
        })
    }

    async fn list_branches(&self, workspace_path: &Path) -> Result<Vec<GitBranch>, GitError> {
        let lines = self
            .run_lines(workspace_path, &["branch", "--format=%(HEAD) %(refname:short) %(upstream:short)"], "branch")
            .await?;
        Ok(lines
            .iter()
            .filter(|l| !l.is_empty())
            .map(|line| {
                let is_head = line.starts_with('*');
                let rest = line.trim_start_matches('*').trim();
                let mut parts = rest.splitn(2, ' ');
                let name = parts.next().unwrap_or_default().to_string();
                let upstream = parts.next().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
                GitBranch {
                    name,
                    is_head,
                    upstream,
                    ahead: 0,
                    behind: 0,
                }
            })
            .collect())
    }

    async fn merge(&self, workspace_path: &Path, opts: MergeOptions) -> Result<MergeResult, GitError> {
        let mut args = vec!["merge", opts.branch.as_str()];
        if opts.no_ff {
            args.push("--no-ff");
        }
        let result = self.run(workspace_path, &args, "merge").await;
        match result {
            Ok(_) => {
                let id = self.run(workspace_path, &["rev-parse", "HEAD"], "merge").await?;
                Ok(MergeResult {
                    fast_forward: false,
                    conflicted_files: Vec::new(),
                    commit_id: Some(id.trim().to_string()),
                })
            }
            Err(err) if err.kind == ErrorKind::GitMergeConflict => Err(err),
            Err(err) => Err(err),
        }
    }

    async fn rebase(&self, workspace_path: &Path, opts: RebaseOptions) -> Result<MergeResult, GitError> {
        self.run(workspace_path, &["rebase", &opts.onto], "rebase").await?;
        let id = self.run(workspace_path, &["rev-parse", "HEAD"], "rebase").await?;
        Ok(MergeResult {
            fast_forward: false,
            conflicted_files: Vec::new(),
            commit_id: Some(id.trim().to_string()),
        })
    }

    async fn stash(&self, workspace_path: &Path, opts: StashOptions) -> Result<Option<String>, GitError> {
        if opts.pop {
            self.run(workspace_path, &["stash", "pop"], "stash").await?;
            return Ok(None);
        }
        let message = opts.message.clone().unwrap_or_else(|| "WIP".to_string());
        self.run(workspace_path, &["stash", "push", "-m", &message], "stash").await?;
        let id = self.run(workspace_path, &["rev-parse", "stash@{0}"], "stash").await.ok();
        Ok(id.map(|s| s.trim().to_string()))
    }

    async fn tag(&self, workspace_path: &Path, opts: TagOptions) -> Result<(), GitError> {
        let mut args = vec!["tag"];
        if let Some(message) = &opts.message {
            args.push("-a");
            args.push(&opts.name);
            args.push("-m");
            args.push(message);
        } else {
            args.push(&opts.name);
        }
        if let Some(target) = &opts.target {
            args.push(target);
        }
        self.run(workspace_path, &args, "tag").await?;
        Ok(())
    }

    async fn log(&self, workspace_path: &Path, opts: LogOptions) -> Result<Vec<CommitInfo>, GitError> {
        let limit = opts.limit.unwrap_or(50).to_string();
        let mut args = vec!["log", "-n", limit.as_str(), "--pretty=format:%H%x1f%an%x1f%ae%x1f%aI%x1f%P%x1f%s"];
        if let Some(path) = &opts.path {
            args.push("--");
            args.push(path);
        }
        let lines = self.run_lines(workspace_path, &args, "log").await?;
        Ok(lines.iter().filter_map(|line| parse_log_line(line)).collect())
    }

    async fn diff(&self, workspace_path: &Path, opts: DiffOptions) -> Result<Vec<DiffEntry>, GitError> {
        let mut args = vec!["diff", "--numstat"];
        if opts.staged {
            args.push("--staged");
        }
        if let Some(against) = &opts.against {
            args.push(against);
        }
        if let Some(path) = &opts.path {
            args.push("--");
            args.push(path);
        }
        let lines = self.run_lines(workspace_path, &args, "diff").await?;
        Ok(lines.iter().filter_map(|line| parse_numstat_line(line)).collect())
    }

    async fn blame(&self, workspace_path: &Path, opts: BlameOptions) -> Result<Vec<BlameLine>, GitError> {
        let lines = self
            .run_lines(workspace_path, &["blame", "--line-porcelain", &opts.path], "blame")
            .await?;
        Ok(parse_blame_porcelain(&lines))
    }

    async fn reset(&self, workspace_path: &Path, opts: ResetOptions) -> Result<(), GitError> {
        let mode = match opts.mode {
            ResetMode::Soft => "--soft",
            ResetMode::Mixed => "--mixed",
            ResetMode::Hard => "--hard",
        };
        self.run(workspace_path, &["reset", mode, &opts.target], "reset").await?;
        Ok(())
    }

    async fn checkout(&self, workspace_path: &Path, opts: CheckoutOptions) -> Result<(), GitError> {
        let mut args = vec!["checkout"];
        if opts.create {
            args.push("-b");
        }
        args.push(&opts.target);
        self.run(workspace_path, &args, "checkout").await?;
        Ok(())
    }

    async fn cherry_pick(&self, workspace_path: &Path, opts: CherryPickOptions) -> Result<CommitInfo, GitError> {
        self.run(workspace_path, &["cherry-pick", &opts.commit], "cherry_pick").await?;
        let id = self.run(workspace_path, &["rev-parse", "HEAD"], "cherry_pick").await?;
        self.commit_info(workspace_path, id.trim()).await
    }

    async fn revert(&self, workspace_path: &Path, opts: RevertOptions) -> Result<CommitInfo, GitError> {
        self.run(workspace_path, &["revert", "--no-edit", &opts.commit], "revert").await?;
        let id = self.run(workspace_path, &["rev-parse", "HEAD"], "revert").await?;
        self.commit_info(workspace_path, id.trim()).await
    }

    async fn clean(&self, workspace_path: &Path, opts: CleanOptions) -> Result<Vec<String>, GitError> {
        let mut args = vec!["clean", "-n"];
        if opts.force {
            args[1] = "-f";
        }
        if opts.directories {
            args.push("-d");
        }
        let lines = self.run_lines(workspace_path, &args, "clean").await?;
        Ok(lines
            .iter()
            .filter_map(|l| l.strip_prefix("Would remove ").or_else(|| l.strip_prefix("Removing ")))
            .map(str::to_string)
            .collect())
    }
}

impl CliGit {
    async fn commit_info(&self, workspace_path: &Path, commit_id: &str) -> Result<CommitInfo, GitError> {
        let line = self
            .run(
                workspace_path,
                &["log", "-n", "1", "--pretty=format:%H%x1f%an%x1f%ae%x1f%aI%x1f%P%x1f%s", commit_id],
                "log",
            )
            .await?;
        parse_log_line(line.trim()).ok_or_else(|| GitError::new(ErrorKind::GitCommandFailed, "failed to parse commit info"))
    }
}

fn parse_porcelain_line(line: &str) -> Option<FileStatus> {
    if line.len() < 4 {
        return None;
    }
    let index_flag = line.as_bytes()[0] as char;
    let worktree_flag = line.as_bytes()[1] as char;
    let path = line[3..].to_string();

    let (change_type, staged) = match (index_flag, worktree_flag) {
        ('U', _) | (_, 'U') => (ChangeType::Conflicted, true),
        ('A', _) => (ChangeType::Added, true),
        (_, 'A') | ('?', '?') => (ChangeType::Untracked, false),
        ('D', _) => (ChangeType::Deleted, true),
        (_, 'D') => (ChangeType::Deleted, false),
        ('R', _) => (ChangeType::Renamed, true),
        ('M', _) => (ChangeType::Modified, true),
        (_, 'M') => (ChangeType::Modified, false),
        _ => (ChangeType::Modified, false),
    };
    Some(FileStatus { path, change_type, staged })
}

fn parse_log_line(line: &str) -> Option<CommitInfo> {
    let mut fields = line.splitn(6, '\u{1f}');
    let id = fields.next()?.to_string();
    let author_name = fields.next()?.to_string();
    let author_email = fields.next()?.to_string();
    let timestamp = fields.next().and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now);
    let parent_ids = fields.next().unwrap_or_default().split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect();
    let message = fields.next().unwrap_or_default().to_string();
    Some(CommitInfo { id, message, author_name, author_email, timestamp, parent_ids })
}

fn parse_numstat_line(line: &str) -> Option<DiffEntry> {
    let mut parts = line.splitn(3, '\t');
    let additions = parts.next()?.parse().unwrap_or(0);
    let deletions = parts.next()?.parse().unwrap_or(0);
    let path = parts.next()?.to_string();
    Some(DiffEntry {
        path,
        change_type: ChangeType::Modified,
        additions,
        deletions,
        patch: String::new(),
    })
}

fn parse_blame_porcelain(lines: &[String]) -> Vec<BlameLine> {
    let mut out = Vec::new();
    let mut commit_id = String::new();
    let mut author_name = String::new();
    let mut line_no = 0usize;

    for line in lines {
        if line.len() >= 40 && line.chars().take(40).all(|c| c.is_ascii_hexdigit()) && line.contains(' ') {
            commit_id = line.split(' ').next().unwrap_or_default().to_string();
            line_no += 1;
        } else if let Some(name) = line.strip_prefix("author ") {
            author_name = name.to_string();
        } else if let Some(content) = line.strip_prefix('\t') {
            out.push(BlameLine {
                line_no,
                commit_id: commit_id.clone(),
                author_name: author_name.clone(),
                content: content.to_string(),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_line_classifies_untracked() {
        let status = parse_porcelain_line("?? new.txt").unwrap();
        assert_eq!(status.change_type, ChangeType::Untracked);
        assert_eq!(status.path, "new.txt");
    }

    #[test]
    fn stderr_maps_auth_failure() {
        let err = map_stderr("fatal: Authentication failed for 'https://example.com'", "push");
        assert_eq!(err.kind, ErrorKind::AuthFailed);
    }

    #[test]
    fn stderr_maps_merge_conflict() {
        let err = map_stderr("CONFLICT (content): Merge conflict in a.txt", "merge");
        assert_eq!(err.kind, ErrorKind::GitMergeConflict);
    }
}
