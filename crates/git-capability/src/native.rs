//! `git2`-backed implementation. Every call opens the repository fresh and
//! runs on the blocking-task pool — `git2::Repository` holds raw libgit2
//! pointers that do not want to cross an `.await` point, so each operation
//! is a self-contained blocking closure rather than a held-open handle.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use git2::{
    AnnotatedCommit, BranchType, FetchOptions as Git2FetchOptions, IndexAddOption, MergeOptions as Git2MergeOptions,
    Oid, PushOptions as Git2PushOptions, Repository, ResetType, Signature, StatusOptions as Git2StatusOptions,
};
use git_error::{ErrorContext, ErrorKind, GitError};
use git_vault::Credential;

use crate::types::*;
use crate::GitCapability;

pub struct NativeGit {
    credential: Option<Credential>,
}

impl Default for NativeGit {
    fn default() -> Self {
        Self::new(None)
    }
}

impl NativeGit {
    pub fn new(credential: Option<Credential>) -> Self {
        Self { credential }
    }

    async fn with_repo<T, F>(workspace_path: &Path, f: F) -> Result<T, GitError>
    where
        T: Send + 'static,
        F: FnOnce(Repository) -> Result<T, GitError> + Send + 'static,
    {
        let path = workspace_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let repo = open_repo(&path)?;
            f(repo)
        })
        .await
        .map_err(|e| GitError::new(ErrorKind::SystemError, format!("blocking task join failed: {e}")))?
    }
}

fn open_repo(path: &Path) -> Result<Repository, GitError> {
    Repository::open(path).map_err(|_| GitError::repo_not_found(path))
}

/// Builds owned, `'static` remote callbacks from a cloned credential — kept
/// free of any borrow on `NativeGit` so it can move into a blocking task.
fn build_remote_callbacks(credential: Option<Credential>) -> git2::RemoteCallbacks<'static> {
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed| {
        let Some(cred) = credential.as_ref() else {
            return Err(git2::Error::from_str("no credential configured"));
        };
        if allowed.contains(git2::CredentialType::SSH_KEY) {
            if let Some(path) = &cred.ssh_key_path {
                return git2::Cred::ssh_key(
                    username_from_url.unwrap_or("git"),
                    None,
                    path,
                    cred.ssh_key_passphrase.as_ref().map(|p| {
                        use secrecy::ExposeSecret;
                        p.expose_secret()
                    }),
                );
            }
            return git2::Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
        }
        if let Some(token) = cred.password() {
            if cred.auth_type == git_vault::AuthType::Token {
                return git2::Cred::userpass_plaintext("x-access-token", token);
            }
            return git2::Cred::userpass_plaintext(cred.username().unwrap_or("git"), token);
        }
        Err(git2::Error::from_str("no usable credential"))
    });
    callbacks
}

/// Translates a `git2::Error` into the shared taxonomy using its error
/// class/code where possible, falling back to a generic git-operation
/// failure.
fn map_git2_error(err: git2::Error, operation: &str) -> GitError {
    use git2::ErrorClass;
    let kind = match err.class() {
        ErrorClass::Http | ErrorClass::Net => ErrorKind::NetworkError,
        ErrorClass::Ssh if err.message().contains("authentication") => ErrorKind::AuthFailed,
        _ if err.message().to_lowercase().contains("authentication") => ErrorKind::AuthFailed,
        _ if err.message().to_lowercase().contains("not found") => ErrorKind::RepoNotFound,
        _ if err.message().to_lowercase().contains("conflict") => ErrorKind::GitMergeConflict,
        _ => ErrorKind::GitCommandFailed,
    };
    GitError::new(kind, err.message().to_string())
        .with_context(ErrorContext::new(operation))
}

fn commit_info(repo: &Repository, oid: Oid) -> Result<CommitInfo, GitError> {
    let commit = repo
        .find_commit(oid)
        .map_err(|e| map_git2_error(e, "log"))?;
    let author = commit.author();
    let timestamp = Utc
        .timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_else(Utc::now);
    Ok(CommitInfo {
        id: oid.to_string(),
        message: commit.message().unwrap_or_default().to_string(),
        author_name: author.name().unwrap_or_default().to_string(),
        author_email: author.email().unwrap_or_default().to_string(),
        timestamp,
        parent_ids: commit.parent_ids().map(|p| p.to_string()).collect(),
    })
}

#[async_trait]
impl GitCapability for NativeGit {
    async fn clone_repo(&self, workspace_path: &Path, opts: CloneOptions) -> Result<CloneResult, GitError> {
        let path = workspace_path.to_path_buf();
        let callbacks = build_remote_callbacks(self.credential.clone());
        let mut fetch_options = Git2FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);
        if let Some(depth) = opts.depth {
            fetch_options.depth(depth as i32);
        }

        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_options);
        if let Some(branch) = &opts.branch {
            builder.branch(branch);
        }

        let url = opts.url.clone();
        let result = tokio::task::spawn_blocking(move || {
            builder
                .clone(&url, &path)
                .map_err(|e| map_git2_error(e, "clone"))
        })
        .await
        .map_err(|e| GitError::new(ErrorKind::SystemError, format!("blocking task join failed: {e}")))??;

        let head_commit = result.head().ok().and_then(|h| h.target()).map(|oid| oid.to_string());
        Ok(CloneResult {
            path: workspace_path.to_path_buf(),
            head_commit,
        })
    }

    async fn status(&self, workspace_path: &Path, _opts: StatusOptions) -> Result<Vec<FileStatus>, GitError> {
        Self::with_repo(workspace_path, |repo| {
            let mut status_opts = Git2StatusOptions::new();
            status_opts.include_untracked(true).recurse_untracked_dirs(true);
            let statuses = repo.statuses(Some(&mut status_opts)).map_err(|e| map_git2_error(e, "status"))?;
            let mut out = Vec::with_capacity(statuses.len());
            for entry in statuses.iter() {
                let path = entry.path().unwrap_or_default().to_string();
                let flags = entry.status();
                let (change_type, staged) = classify_status(flags);
                out.push(FileStatus { path, change_type, staged });
            }
            Ok(out)
        })
        .await
    }

    async fn add(&self, workspace_path: &Path, opts: AddOptions) -> Result<(), GitError> {
        Self::with_repo(workspace_path, move |repo| {
            let mut index = repo.index().map_err(|e| map_git2_error(e, "add"))?;
            if opts.paths.is_empty() {
                index
                    .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
                    .map_err(|e| map_git2_error(e, "add"))?;
            } else {
                for path in &opts.paths {
                    index.add_path(Path::new(path)).map_err(|e| map_git2_error(e, "add"))?;
                }
            }
            index.write().map_err(|e| map_git2_error(e, "add"))?;
            Ok(())
        })
        .await
    }

    async fn commit(&self, workspace_path: &Path, opts: CommitOptions) -> Result<CommitInfo, GitError> {
        Self::with_repo(workspace_path, move |repo| {
            if opts.all {
                let mut index = repo.index().map_err(|e| map_git2_error(e, "commit"))?;
                index
                    .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
                    .map_err(|e| map_git2_error(e, "commit"))?;
                index.write().map_err(|e| map_git2_error(e, "commit"))?;
            }
            let mut index = repo.index().map_err(|e| map_git2_error(e, "commit"))?;
            let tree_id = index.write_tree().map_err(|e| map_git2_error(e, "commit"))?;
            let tree = repo.find_tree(tree_id).map_err(|e| map_git2_error(e, "commit"))?;

            let signature = match (&opts.author_name, &opts.author_email) {
                (Some(name), Some(email)) => Signature::now(name, email),
                _ => repo.signature(),
            }
            .map_err(|e| map_git2_error(e, "commit"))?;

            let parent = repo.head().ok().and_then(|h| h.target()).and_then(|oid| repo.find_commit(oid).ok());
            let parents: Vec<&git2::Commit> = parent.iter().collect();

            if parents.is_empty() {
                let has_staged = !index.is_empty();
                if !has_staged {
                    return Err(GitError::new(ErrorKind::GitNoChanges, "nothing to commit"));
                }
            }

            let oid = repo
                .commit(Some("HEAD"), &signature, &signature, &opts.message, &tree, &parents)
                .map_err(|e| map_git2_error(e, "commit"))?;

            commit_info(&repo, oid)
        })
        .await
    }

    async fn push(&self, workspace_path: &Path, opts: PushOptions) -> Result<PushResult, GitError> {
        let callbacks = build_remote_callbacks(self.credential.clone());
        let remote_name = opts.remote.clone().unwrap_or_else(|| "origin".to_string());
        let branch = opts.branch.clone();
        let force = opts.force;

        Self::with_repo(workspace_path, move |repo| {
            let mut remote = repo.find_remote(&remote_name).map_err(|e| map_git2_error(e, "push"))?;
            let branch_name = match branch {
                Some(b) => b,
                None => {
                    let head = repo.head().map_err(|e| map_git2_error(e, "push"))?;
                    head.shorthand().unwrap_or("main").to_string()
                }
            };
            let refspec = if force {
                format!("+refs/heads/{branch_name}:refs/heads/{branch_name}")
            } else {
                format!("refs/heads/{branch_name}:refs/heads/{branch_name}")
            };
            let mut push_opts = Git2PushOptions::new();
            push_opts.remote_callbacks(callbacks);
            remote
                .push(&[&refspec], Some(&mut push_opts))
                .map_err(|e| map_git2_error(e, "push"))?;
            Ok(PushResult {
                remote: remote_name,
                branch: branch_name,
            })
        })
        .await
    }

    async fn pull(&self, workspace_path: &Path, opts: PullOptions) -> Result<MergeResult, GitError> {
        self.fetch(
            workspace_path,
            FetchOptions {
                remote: opts.remote.clone(),
                prune: false,
            },
        )
        .await?;

        let branch = opts.branch.clone();
        let callbacks_remote = opts.remote.clone().unwrap_or_else(|| "origin".to_string());

        Self::with_repo(workspace_path, move |repo| {
            let head = repo.head().map_err(|e| map_git2_error(e, "pull"))?;
            let branch_name = branch.unwrap_or_else(|| head.shorthand().unwrap_or("main").to_string());
            let fetch_head_ref = format!("refs/remotes/{callbacks_remote}/{branch_name}");
            let remote_ref = repo
                .find_reference(&fetch_head_ref)
                .map_err(|e| map_git2_error(e, "pull"))?;
            let annotated = repo
                .reference_to_annotated_commit(&remote_ref)
                .map_err(|e| map_git2_error(e, "pull"))?;
            merge_annotated(&repo, &annotated)
        })
        .await
    }

    async fn fetch(&self, workspace_path: &Path, opts: FetchOptions) -> Result<(), GitError> {
        let callbacks = build_remote_callbacks(self.credential.clone());
        let remote_name = opts.remote.clone().unwrap_or_else(|| "origin".to_string());
        let prune = opts.prune;

        Self::with_repo(workspace_path, move |repo| {
            let mut remote = repo.find_remote(&remote_name).map_err(|e| map_git2_error(e, "fetch"))?;
            let mut fetch_opts = Git2FetchOptions::new();
            fetch_opts.remote_callbacks(callbacks);
            if prune {
                fetch_opts.prune(git2::FetchPrune::On);
            }
            remote
                .fetch(&[] as &[&str], Some(&mut fetch_opts), None)
                .map_err(|e| map_git2_error(e, "fetch"))?;
            Ok(())
        })
        .await
    }

    async fn branch(&self, workspace_path: &Path, opts: BranchOptions) -> Result<GitBranch, GitError> {
        Self::with_repo(workspace_path, move |repo| {
            let target_commit = match &opts.start_point {
                Some(start) => {
                    let obj = repo.revparse_single(start).map_err(|e| map_git2_error(e, "branch"))?;
                    obj.peel_to_commit().map_err(|e| map_git2_error(e, "branch"))?
                }
                None => {
                    let head = repo.head().map_err(|e| map_git2_error(e, "branch"))?;
                    head.peel_to_commit().map_err(|e| map_git2_error(e, "branch"))?
                }
            };
            let branch = repo
                .branch(&opts.name, &target_commit, false)
                .map_err(|e| map_git2_error(e, "branch"))?;
            if opts.checkout {
                let refname = branch.get().name().unwrap_or_default().to_string();
                repo.set_head(&refname).map_err(|e| map_git2_error(e, "branch"))?;
                repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
                    .map_err(|e| map_git2_error(e, "branch"))?;
            }
            Ok(GitBranch {
                name: opts.name,
                is_head: opts.checkout,
                upstream: None,
                ahead: 0,
                behind: 0,
            })
        })
        .await
    }

    async fn list_branches(&self, workspace_path: &Path) -> Result<Vec<GitBranch>, GitError> {
        Self::with_repo(workspace_path, |repo| {
            let head_name = repo.head().ok().and_then(|h| h.shorthand().map(String::from));
            let mut out = Vec::new();
            let branches = repo.branches(Some(BranchType::Local)).map_err(|e| map_git2_error(e, "branch"))?;
            for branch in branches {
                let (branch, _) = branch.map_err(|e| map_git2_error(e, "branch"))?;
                let name = branch.name().ok().flatten().unwrap_or_default().to_string();
                let upstream = branch.upstream().ok().and_then(|u| u.name().ok().flatten().map(String::from));
                let is_head = head_name.as_deref() == Some(name.as_str());
                out.push(GitBranch {
                    name,
                    is_head,
                    upstream,
                    ahead: 0,
                    behind: 0,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn merge(&self, workspace_path: &Path, opts: MergeOptions) -> Result<MergeResult, GitError> {
        Self::with_repo(workspace_path, move |repo| {
            let obj = repo
                .revparse_single(&opts.branch)
                .map_err(|e| map_git2_error(e, "merge"))?;
            let annotated = repo
                .find_annotated_commit(obj.id())
                .map_err(|e| map_git2_error(e, "merge"))?;
            merge_annotated(&repo, &annotated)
        })
        .await
    }

    async fn rebase(&self, workspace_path: &Path, opts: RebaseOptions) -> Result<MergeResult, GitError> {
        Self::with_repo(workspace_path, move |repo| {
            let onto_obj = repo
                .revparse_single(&opts.onto)
                .map_err(|e| map_git2_error(e, "rebase"))?;
            let onto = repo
                .find_annotated_commit(onto_obj.id())
                .map_err(|e| map_git2_error(e, "rebase"))?;
            let head = repo.reference_to_annotated_commit(&repo.head().map_err(|e| map_git2_error(e, "rebase"))?)
                .map_err(|e| map_git2_error(e, "rebase"))?;

            let mut rebase = repo
                .rebase(Some(&head), None, Some(&onto), None)
                .map_err(|e| map_git2_error(e, "rebase"))?;

            let signature = repo.signature().map_err(|e| map_git2_error(e, "rebase"))?;
            let mut conflicted = Vec::new();
            while let Some(op) = rebase.next() {
                op.map_err(|e| map_git2_error(e, "rebase"))?;
                let index = repo.index().map_err(|e| map_git2_error(e, "rebase"))?;
                if index.has_conflicts() {
                    for conflict in index.conflicts().map_err(|e| map_git2_error(e, "rebase"))?.flatten() {
                        if let Some(our) = conflict.our {
                            conflicted.push(String::from_utf8_lossy(&our.path).to_string());
                        }
                    }
                    break;
                }
                rebase.commit(None, &signature, None).map_err(|e| map_git2_error(e, "rebase"))?;
            }

            if conflicted.is_empty() {
                rebase.finish(Some(&signature)).map_err(|e| map_git2_error(e, "rebase"))?;
                Ok(MergeResult {
                    fast_forward: false,
                    conflicted_files: Vec::new(),
                    commit_id: repo.head().ok().and_then(|h| h.target()).map(|oid| oid.to_string()),
                })
            } else {
                Err(GitError::merge_conflict(&conflicted).with_context(ErrorContext::new("rebase")))
            }
        })
        .await
    }

    async fn stash(&self, workspace_path: &Path, opts: StashOptions) -> Result<Option<String>, GitError> {
        Self::with_repo(workspace_path, move |mut repo| {
            let signature = repo.signature().map_err(|e| map_git2_error(e, "stash"))?;
            if opts.pop {
                repo.stash_pop(0, None).map_err(|e| map_git2_error(e, "stash"))?;
                Ok(None)
            } else {
                let message = opts.message.as_deref().unwrap_or("WIP");
                let oid = repo
                    .stash_save(&signature, message, Some(git2::StashFlags::DEFAULT))
                    .map_err(|e| map_git2_error(e, "stash"))?;
                Ok(Some(oid.to_string()))
            }
        })
        .await
    }

    async fn tag(&self, workspace_path: &Path, opts: TagOptions) -> Result<(), GitError> {
        Self::with_repo(workspace_path, move |repo| {
            let target = match &opts.target {
                Some(t) => repo.revparse_single(t).map_err(|e| map_git2_error(e, "tag"))?,
                None => repo.head().map_err(|e| map_git2_error(e, "tag"))?.peel(git2::ObjectType::Commit).map_err(|e| map_git2_error(e, "tag"))?,
            };
            match &opts.message {
                Some(message) => {
                    let signature = repo.signature().map_err(|e| map_git2_error(e, "tag"))?;
                    repo.tag(&opts.name, &target, &signature, message, false)
                        .map_err(|e| map_git2_error(e, "tag"))?;
                }
                None => {
                    repo.tag_lightweight(&opts.name, &target, false)
                        .map_err(|e| map_git2_error(e, "tag"))?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn log(&self, workspace_path: &Path, opts: LogOptions) -> Result<Vec<CommitInfo>, GitError> {
        Self::with_repo(workspace_path, move |repo| {
            let mut revwalk = repo.revwalk().map_err(|e| map_git2_error(e, "log"))?;
            revwalk.push_head().map_err(|e| map_git2_error(e, "log"))?;
            let limit = opts.limit.unwrap_or(50);
            let mut out = Vec::new();
            for oid in revwalk.take(limit) {
                let oid = oid.map_err(|e| map_git2_error(e, "log"))?;
                out.push(commit_info(&repo, oid)?);
            }
            Ok(out)
        })
        .await
    }

    async fn diff(&self, workspace_path: &Path, opts: DiffOptions) -> Result<Vec<DiffEntry>, GitError> {
        Self::with_repo(workspace_path, move |repo| {
            let diff = if opts.staged {
                let head_tree = repo.head().ok().and_then(|h| h.peel_to_tree().ok());
                repo.diff_tree_to_index(head_tree.as_ref(), None, None)
                    .map_err(|e| map_git2_error(e, "diff"))?
            } else if let Some(rev) = &opts.against {
                let obj = repo.revparse_single(rev).map_err(|e| map_git2_error(e, "diff"))?;
                let tree = obj.peel_to_tree().map_err(|e| map_git2_error(e, "diff"))?;
                repo.diff_tree_to_workdir_with_index(Some(&tree), None)
                    .map_err(|e| map_git2_error(e, "diff"))?
            } else {
                repo.diff_index_to_workdir(None, None).map_err(|e| map_git2_error(e, "diff"))?
            };

            let mut entries: Vec<DiffEntry> = Vec::new();
            diff.foreach(
                &mut |delta, _progress| {
                    let path = delta
                        .new_file()
                        .path()
                        .or_else(|| delta.old_file().path())
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let change_type = match delta.status() {
                        git2::Delta::Added => ChangeType::Added,
                        git2::Delta::Deleted => ChangeType::Deleted,
                        git2::Delta::Renamed => ChangeType::Renamed,
                        git2::Delta::Typechange => ChangeType::Typechange,
                        _ => ChangeType::Modified,
                    };
                    entries.push(DiffEntry {
                        path,
                        change_type,
                        additions: 0,
                        deletions: 0,
                        patch: String::new(),
                    });
                    true
                },
                None,
                None,
                None,
            )
            .map_err(|e| map_git2_error(e, "diff"))?;

            if let Ok(stats) = diff.stats() {
                if let Some(first) = entries.first_mut() {
                    first.additions = stats.insertions();
                    first.deletions = stats.deletions();
                }
            }
            if let Some(path_filter) = &opts.path {
                entries.retain(|e| &e.path == path_filter);
            }
            Ok(entries)
        })
        .await
    }

    async fn blame(&self, workspace_path: &Path, opts: BlameOptions) -> Result<Vec<BlameLine>, GitError> {
        Self::with_repo(workspace_path, move |repo| {
            let blame = repo
                .blame_file(Path::new(&opts.path), None)
                .map_err(|e| map_git2_error(e, "blame"))?;
            let full_path = workspace_path_join(&repo, &opts.path);
            let content = std::fs::read_to_string(&full_path).unwrap_or_default();
            let lines: Vec<&str> = content.lines().collect();

            let mut out = Vec::new();
            for hunk in blame.iter() {
                let commit = repo.find_commit(hunk.final_commit_id()).ok();
                let author_name = commit
                    .as_ref()
                    .and_then(|c| c.author().name().map(String::from))
                    .unwrap_or_default();
                let start = hunk.final_start_line();
                for i in 0..hunk.lines_in_hunk() {
                    let line_no = start + i;
                    let content = lines.get(line_no.saturating_sub(1)).copied().unwrap_or_default();
                    out.push(BlameLine {
                        line_no,
                        commit_id: hunk.final_commit_id().to_string(),
                        author_name: author_name.clone(),
                        content: content.to_string(),
                    });
                }
            }
            Ok(out)
        })
        .await
    }

    async fn reset(&self, workspace_path: &Path, opts: ResetOptions) -> Result<(), GitError> {
        Self::with_repo(workspace_path, move |repo| {
            let obj = repo.revparse_single(&opts.target).map_err(|e| map_git2_error(e, "reset"))?;
            let reset_type = match opts.mode {
                ResetMode::Soft => ResetType::Soft,
                ResetMode::Mixed => ResetType::Mixed,
                ResetMode::Hard => ResetType::Hard,
            };
            repo.reset(&obj, reset_type, None).map_err(|e| map_git2_error(e, "reset"))
        })
        .await
    }

    async fn checkout(&self, workspace_path: &Path, opts: CheckoutOptions) -> Result<(), GitError> {
        Self::with_repo(workspace_path, move |repo| {
            if opts.create {
                let head_commit = repo.head().map_err(|e| map_git2_error(e, "checkout"))?.peel_to_commit().map_err(|e| map_git2_error(e, "checkout"))?;
                repo.branch(&opts.target, &head_commit, false).map_err(|e| map_git2_error(e, "checkout"))?;
            }
            let (object, reference) = repo
                .revparse_ext(&opts.target)
                .map_err(|e| map_git2_error(e, "checkout"))?;
            repo.checkout_tree(&object, Some(git2::build::CheckoutBuilder::new().safe()))
                .map_err(|e| map_git2_error(e, "checkout"))?;
            match reference {
                Some(r) => repo.set_head(r.name().unwrap_or_default()),
                None => repo.set_head_detached(object.id()),
            }
            .map_err(|e| map_git2_error(e, "checkout"))
        })
        .await
    }

    async fn cherry_pick(&self, workspace_path: &Path, opts: CherryPickOptions) -> Result<CommitInfo, GitError> {
        Self::with_repo(workspace_path, move |mut repo| {
            let commit = repo
                .find_commit(Oid::from_str(&opts.commit).map_err(|e| map_git2_error(e, "cherry_pick"))?)
                .map_err(|e| map_git2_error(e, "cherry_pick"))?;
            repo.cherrypick(&commit, Some(&mut Git2MergeOptions::new()))
                .map_err(|e| map_git2_error(e, "cherry_pick"))?;
            let mut index = repo.index().map_err(|e| map_git2_error(e, "cherry_pick"))?;
            if index.has_conflicts() {
                return Err(GitError::new(ErrorKind::GitMergeConflict, "cherry-pick produced conflicts"));
            }
            let tree_id = index.write_tree().map_err(|e| map_git2_error(e, "cherry_pick"))?;
            let tree = repo.find_tree(tree_id).map_err(|e| map_git2_error(e, "cherry_pick"))?;
            let signature = repo.signature().map_err(|e| map_git2_error(e, "cherry_pick"))?;
            let head_commit = repo.head().map_err(|e| map_git2_error(e, "cherry_pick"))?.peel_to_commit().map_err(|e| map_git2_error(e, "cherry_pick"))?;
            let oid = repo
                .commit(Some("HEAD"), &signature, &commit.author(), commit.message().unwrap_or_default(), &tree, &[&head_commit])
                .map_err(|e| map_git2_error(e, "cherry_pick"))?;
            repo.cleanup_state().map_err(|e| map_git2_error(e, "cherry_pick"))?;
            commit_info(&repo, oid)
        })
        .await
    }

    async fn revert(&self, workspace_path: &Path, opts: RevertOptions) -> Result<CommitInfo, GitError> {
        Self::with_repo(workspace_path, move |mut repo| {
            let commit = repo
                .find_commit(Oid::from_str(&opts.commit).map_err(|e| map_git2_error(e, "revert"))?)
                .map_err(|e| map_git2_error(e, "revert"))?;
            repo.revert(&commit, Some(&mut git2::RevertOptions::new()))
                .map_err(|e| map_git2_error(e, "revert"))?;
            let mut index = repo.index().map_err(|e| map_git2_error(e, "revert"))?;
            if index.has_conflicts() {
                return Err(GitError::new(ErrorKind::GitMergeConflict, "revert produced conflicts"));
            }
            let tree_id = index.write_tree().map_err(|e| map_git2_error(e, "revert"))?;
            let tree = repo.find_tree(tree_id).map_err(|e| map_git2_error(e, "revert"))?;
            let signature = repo.signature().map_err(|e| map_git2_error(e, "revert"))?;
            let head_commit = repo.head().map_err(|e| map_git2_error(e, "revert"))?.peel_to_commit().map_err(|e| map_git2_error(e, "revert"))?;
            let message = format!("Revert \"{}\"", commit.message().unwrap_or_default().trim());
            let oid = repo
                .commit(Some("HEAD"), &signature, &signature, &message, &tree, &[&head_commit])
                .map_err(|e| map_git2_error(e, "revert"))?;
            repo.cleanup_state().map_err(|e| map_git2_error(e, "revert"))?;
            commit_info(&repo, oid)
        })
        .await
    }

    async fn clean(&self, workspace_path: &Path, opts: CleanOptions) -> Result<Vec<String>, GitError> {
        Self::with_repo(workspace_path, move |repo| {
            let mut status_opts = Git2StatusOptions::new();
            status_opts.include_untracked(true).recurse_untracked_dirs(true);
            let statuses = repo.statuses(Some(&mut status_opts)).map_err(|e| map_git2_error(e, "clean"))?;
            let workdir = repo.workdir().ok_or_else(|| GitError::new(ErrorKind::GitNotARepo, "bare repository has no working tree"))?;

            let mut removed = Vec::new();
            for entry in statuses.iter() {
                if !entry.status().contains(git2::Status::WT_NEW) {
                    continue;
                }
                let Some(rel) = entry.path() else { continue };
                let full = workdir.join(rel);
                if !opts.force {
                    removed.push(rel.to_string());
                    continue;
                }
                let is_dir = full.is_dir();
                if is_dir && !opts.directories {
                    continue;
                }
                let result = if is_dir { std::fs::remove_dir_all(&full) } else { std::fs::remove_file(&full) };
                if result.is_ok() {
                    removed.push(rel.to_string());
                }
            }
            Ok(removed)
        })
        .await
    }
}

fn classify_status(flags: git2::Status) -> (ChangeType, bool) {
    use git2::Status;
    if flags.contains(Status::CONFLICTED) {
        return (ChangeType::Conflicted, true);
    }
    if flags.intersects(Status::INDEX_NEW | Status::WT_NEW) {
        return (ChangeType::Added, flags.intersects(Status::INDEX_NEW));
    }
    if flags.intersects(Status::INDEX_DELETED | Status::WT_DELETED) {
        return (ChangeType::Deleted, flags.contains(Status::INDEX_DELETED));
    }
    if flags.intersects(Status::INDEX_RENAMED | Status::WT_RENAMED) {
        return (ChangeType::Renamed, flags.contains(Status::INDEX_RENAMED));
    }
    if flags.intersects(Status::INDEX_TYPECHANGE | Status::WT_TYPECHANGE) {
        return (ChangeType::Typechange, flags.contains(Status::INDEX_TYPECHANGE));
    }
    (ChangeType::Modified, flags.contains(Status::INDEX_MODIFIED))
}

fn merge_annotated(repo: &Repository, annotated: &AnnotatedCommit) -> Result<MergeResult, GitError> {
    let (analysis, _) = repo.merge_analysis(&[annotated]).map_err(|e| map_git2_error(e, "merge"))?;

    if analysis.is_up_to_date() {
        return Err(GitError::new(ErrorKind::GitUpToDate, "already up to date"));
    }

    if analysis.is_fast_forward() {
        let refname = repo.head().map_err(|e| map_git2_error(e, "merge"))?.name().unwrap_or("HEAD").to_string();
        let mut reference = repo.find_reference(&refname).map_err(|e| map_git2_error(e, "merge"))?;
        reference
            .set_target(annotated.id(), "fast-forward merge")
            .map_err(|e| map_git2_error(e, "merge"))?;
        repo.set_head(&refname).map_err(|e| map_git2_error(e, "merge"))?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .map_err(|e| map_git2_error(e, "merge"))?;
        return Ok(MergeResult {
            fast_forward: true,
            conflicted_files: Vec::new(),
            commit_id: Some(annotated.id().to_string()),
        });
    }

    repo.merge(&[annotated], None, None).map_err(|e| map_git2_error(e, "merge"))?;
    let mut index = repo.index().map_err(|e| map_git2_error(e, "merge"))?;
    if index.has_conflicts() {
        let conflicted: Vec<String> = index
            .conflicts()
            .map_err(|e| map_git2_error(e, "merge"))?
            .flatten()
            .filter_map(|c| c.our.map(|e| String::from_utf8_lossy(&e.path).to_string()))
            .collect();
        return Err(GitError::merge_conflict(&conflicted).with_context(ErrorContext::new("merge")));
    }

    let tree_id = index.write_tree().map_err(|e| map_git2_error(e, "merge"))?;
    let tree = repo.find_tree(tree_id).map_err(|e| map_git2_error(e, "merge"))?;
    let signature = repo.signature().map_err(|e| map_git2_error(e, "merge"))?;
    let head_commit = repo.head().map_err(|e| map_git2_error(e, "merge"))?.peel_to_commit().map_err(|e| map_git2_error(e, "merge"))?;
    let their_commit = repo.find_commit(annotated.id()).map_err(|e| map_git2_error(e, "merge"))?;
    let message = format!("Merge commit '{}'", annotated.id());
    let oid = repo
        .commit(Some("HEAD"), &signature, &signature, &message, &tree, &[&head_commit, &their_commit])
        .map_err(|e| map_git2_error(e, "merge"))?;
    repo.cleanup_state().map_err(|e| map_git2_error(e, "merge"))?;

    Ok(MergeResult {
        fast_forward: false,
        conflicted_files: Vec::new(),
        commit_id: Some(oid.to_string()),
    })
}

fn workspace_path_join(repo: &Repository, rel: &str) -> PathBuf {
    repo.workdir().map(|w| w.join(rel)).unwrap_or_else(|| PathBuf::from(rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn init_repo(path: &Path) -> Repository {
        let repo = Repository::init(path).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test User").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn commit_creates_initial_commit() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let git = NativeGit::default();
        git.add(dir.path(), AddOptions { paths: vec![] }).await.unwrap();
        let commit = git
            .commit(
                dir.path(),
                CommitOptions {
                    message: "initial".into(),
                    author_name: Some("Test User".into()),
                    author_email: Some("test@example.com".into()),
                    all: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(commit.message, "initial");
        assert!(commit.parent_ids.is_empty());
    }

    #[tokio::test]
    async fn status_reports_untracked_file() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("new.txt"), "content").unwrap();

        let git = NativeGit::default();
        let statuses = git.status(dir.path(), StatusOptions {}).await.unwrap();
        assert!(statuses.iter().any(|s| s.path == "new.txt" && s.change_type == ChangeType::Added));
    }
}
