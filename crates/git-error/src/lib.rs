//! Closed error taxonomy shared by every `git-*` crate.
//!
//! Mirrors the code-range convention of the original implementation: each
//! [`ErrorKind`] carries a numeric code whose range determines its
//! [`ErrorCategory`]. Per-crate error enums (`StoreError`, `RetryError`,
//! `VaultError`, `SanitizeError`, `CapabilityError`, `ServiceError`) convert
//! into [`GitError`] via `#[from]`, the same aggregation shape the upstream
//! `ApiError` uses.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorCategory {
    ParameterValidation,
    GitOperation,
    RepositoryAccess,
    Network,
    System,
    TaskExecution,
}

macro_rules! error_kinds {
    ($($name:ident = $code:expr),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum ErrorKind {
            $($name),+
        }

        impl ErrorKind {
            pub fn code(self) -> u32 {
                match self {
                    $(ErrorKind::$name => $code),+
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(ErrorKind::$name => stringify!($name)),+
                }
            }
        }
    };
}

error_kinds! {
    InvalidRepoPath = 40001,
    InvalidRemoteUrl = 40002,
    InvalidBranchName = 40003,
    InvalidCommitMessage = 40004,
    InvalidTimeout = 40005,
    InvalidTargetPath = 40006,
    MissingRequiredParam = 40007,
    ParameterConflict = 40008,

    GitCommandFailed = 40100,
    GitNotARepo = 40101,
    GitNoChanges = 40102,
    GitDetachedHead = 40103,
    GitMergeConflict = 40104,
    GitRebaseConflict = 40105,
    GitUpToDate = 40106,
    GitPushRejected = 40107,

    RepoAccessDenied = 40200,
    RepoNotFound = 40201,
    RepoLocked = 40202,

    NetworkError = 40300,
    Timeout = 40301,
    AuthFailed = 40302,

    SystemError = 40400,
    PermissionDenied = 40401,
    ResourceExhausted = 40402,

    TaskNotFound = 40501,
    TaskCancelled = 40502,
    TaskTimeout = 40503,
    TaskExecutorError = 40504,
}

impl ErrorKind {
    pub fn category(self) -> ErrorCategory {
        match self.code() {
            40001..=40099 => ErrorCategory::ParameterValidation,
            40100..=40199 => ErrorCategory::GitOperation,
            40200..=40299 => ErrorCategory::RepositoryAccess,
            40300..=40399 => ErrorCategory::Network,
            40400..=40499 => ErrorCategory::System,
            _ => ErrorCategory::TaskExecution,
        }
    }

    /// Matches `is_retryable_error`'s fixed set exactly.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::Timeout
                | ErrorKind::AuthFailed
                | ErrorKind::GitPushRejected
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation: String,
    pub repo_path: Option<PathBuf>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_repo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.repo_path = Some(path.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// The base error type every `git-*` crate's error converts into.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct GitError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
    pub suggestion: Option<String>,
    pub context: ErrorContext,
    pub timestamp: DateTime<Utc>,
}

impl GitError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            suggestion: None,
            context: ErrorContext::new("unknown"),
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn repo_not_found(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(ErrorKind::RepoNotFound, format!("Repository not found: {}", path.display()))
            .with_details(format!("Cannot find repository at {}", path.display()))
            .with_suggestion("Check the repository path and ensure it exists")
            .with_context(ErrorContext::new("repository_access").with_repo_path(path))
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailed, message.into())
            .with_suggestion("Check your credentials and ensure they have the required permissions")
    }

    pub fn merge_conflict(conflicted_files: &[String]) -> Self {
        Self::new(
            ErrorKind::GitMergeConflict,
            format!("Merge conflict in files: {}", conflicted_files.join(", ")),
        )
        .with_details(format!("Conflicted files: {conflicted_files:?}"))
        .with_suggestion("Resolve the conflicts manually, then stage and commit the resolution")
        .with_context(ErrorContext::new("merge"))
    }

    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self::new(ErrorKind::TaskNotFound, format!("Task not found: {task_id}"))
            .with_details(format!("Cannot find task with ID {task_id}"))
            .with_suggestion("Verify the task_id is correct and the task hasn't expired")
            .with_context(ErrorContext::new("task_query").with_param("task_id", task_id))
    }

    pub fn task_cancelled(task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self::new(ErrorKind::TaskCancelled, format!("Task was cancelled: {task_id}"))
            .with_details(format!("Task {task_id} was cancelled before completion"))
            .with_suggestion("Create a new task to continue the operation")
            .with_context(ErrorContext::new("task_cancel").with_param("task_id", task_id))
    }

    pub fn task_timeout(task_id: impl Into<String>, timeout_seconds: u64) -> Self {
        let task_id = task_id.into();
        Self::new(ErrorKind::TaskTimeout, format!("Task timed out after {timeout_seconds} seconds"))
            .with_details(format!("Task {task_id} exceeded the configured timeout"))
            .with_suggestion("Increase the timeout value or simplify the operation")
            .with_context(
                ErrorContext::new("task_execution")
                    .with_param("task_id", task_id)
                    .with_param("timeout_seconds", timeout_seconds),
            )
    }

    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.kind.code(),
            "name": self.kind.name(),
            "message": self.message,
            "details": self.details,
            "suggestion": self.suggestion,
            "context": self.context,
            "timestamp": self.timestamp,
            "category": self.category(),
        })
    }

    /// The error's own message plus suggestion, verbatim.
    pub fn to_user_message(&self) -> String {
        match &self.suggestion {
            Some(suggestion) => format!("{}\n\nSuggestion: {suggestion}", self.message),
            None => self.message.clone(),
        }
    }

    /// A canned, category-appropriate message for surfacing to end users,
    /// falling back to the error's own message for kinds with no preset.
    pub fn user_friendly_message(&self) -> String {
        let base = match self.kind {
            ErrorKind::RepoNotFound => "The repository was not found. Please check the URL or path.".to_string(),
            ErrorKind::AuthFailed => "Authentication failed. Please check your credentials.".to_string(),
            ErrorKind::GitMergeConflict => "There are merge conflicts that need to be resolved.".to_string(),
            ErrorKind::Timeout => "The operation timed out. Please try again.".to_string(),
            ErrorKind::NetworkError => "A network error occurred. Please check your connection.".to_string(),
            _ => "An error occurred. Please try again.".to_string(),
        };
        match &self.suggestion {
            Some(suggestion) => format!("{base}\n\nSuggestion: {suggestion}"),
            None => base,
        }
    }
}
