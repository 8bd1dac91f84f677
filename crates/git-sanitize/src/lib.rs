//! Path containment and shell-bound string sanitization for every argument
//! that crosses into a subprocess invocation or filesystem path.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use git_error::{ErrorContext, ErrorKind, GitError};
use regex::Regex;

const MAX_INPUT_LEN: usize = 1000;

const SHELL_METACHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '\\', '"', '\'',
];

const BRANCH_RESERVED: &[&str] = &["HEAD", "FETCH_HEAD", "ORIG_HEAD", "ORIGIN_HEAD"];
const BRANCH_INVALID_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\', '@', '{'];

static DANGEROUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"rm\s+-rf",
        r"cat\s+/etc/",
        r"wget\s+https?://",
        r"curl\s+https?://",
        r"bash\s+-c",
        r"sh\s+-c",
        r"/etc/passwd",
        r"/etc/shadow",
        r"\$\{.*\}",
        r"\$\(.*\)",
        "`[^`]*`",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern compiles"))
    .collect()
});

/// Resolves `p` against `base` and verifies the result stays inside `base`.
///
/// Relative paths are joined onto `base` first. `..` segments that would
/// escape `base`, and absolute paths pointing outside it, are rejected.
pub fn sanitize_path(p: impl AsRef<Path>, base: impl AsRef<Path>) -> Result<PathBuf, GitError> {
    let base = base.as_ref();
    let p = p.as_ref();

    let joined = if p.is_absolute() { p.to_path_buf() } else { base.join(p) };
    let normalized = normalize_lexically(&joined);
    let normalized_base = normalize_lexically(base);

    if !normalized.starts_with(&normalized_base) {
        return Err(GitError::new(
            ErrorKind::InvalidTargetPath,
            format!("path {} escapes base {}", p.display(), base.display()),
        )
        .with_suggestion("Use a path inside the workspace root")
        .with_context(ErrorContext::new("sanitize_path").with_repo_path(base.to_path_buf())));
    }

    Ok(normalized)
}

/// Lexical `..`/`.` resolution without touching the filesystem, so this
/// works for paths that do not exist yet (e.g. a clone destination).
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Strips shell metacharacters, newlines, and null bytes from `s`, excises
/// dangerous command patterns, collapses whitespace, and truncates to
/// [`MAX_INPUT_LEN`].
pub fn sanitize_input(s: &str) -> String {
    let mut cleaned: String = s
        .chars()
        .filter(|c| !SHELL_METACHARS.contains(c) && *c != '\n' && *c != '\r' && *c != '\0')
        .collect();

    for pattern in DANGEROUS_PATTERNS.iter() {
        cleaned = pattern.replace_all(&cleaned, "").to_string();
    }

    cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    cleaned.truncate(MAX_INPUT_LEN);
    cleaned
}

pub fn sanitize_branch_name(name: &str) -> Result<String, GitError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid(ErrorKind::InvalidBranchName, "branch name must not be empty"));
    }
    if BRANCH_RESERVED.contains(&trimmed) {
        return Err(invalid(
            ErrorKind::InvalidBranchName,
            format!("{trimmed} is a reserved ref name"),
        ));
    }
    if trimmed.starts_with('/') {
        return Err(invalid(ErrorKind::InvalidBranchName, "branch name must not start with '/'"));
    }
    if trimmed.chars().any(|c| BRANCH_INVALID_CHARS.contains(&c) || c.is_whitespace()) {
        return Err(invalid(
            ErrorKind::InvalidBranchName,
            format!("branch name {trimmed} contains an invalid character"),
        ));
    }
    Ok(sanitize_input(trimmed))
}

/// Remote URLs keep URL-legal punctuation (`:`, `/`, `@`, `.`, `-`, `_`, `~`,
/// `?`, `=`, `&`, `%`) but are still length-capped and newline/null-stripped.
pub fn sanitize_remote_url(url: &str) -> Result<String, GitError> {
    if url.trim().is_empty() {
        return Err(invalid(ErrorKind::InvalidRemoteUrl, "remote url must not be empty"));
    }
    let cleaned: String = url
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\0' | ';' | '|' | '`' | '$'))
        .take(MAX_INPUT_LEN)
        .collect();
    Ok(cleaned)
}

/// Commit messages are sanitized through the base filter but permit normal
/// punctuation; only metacharacters that would break argument framing are
/// stripped.
pub fn sanitize_commit_message(message: &str) -> Result<String, GitError> {
    if message.trim().is_empty() {
        return Err(invalid(ErrorKind::InvalidCommitMessage, "commit message must not be empty"));
    }
    let cleaned: String = message
        .chars()
        .filter(|c| !matches!(c, '\0' | '`' | '$'))
        .collect();
    let mut cleaned = cleaned.replace("\r\n", "\n");
    cleaned.truncate(MAX_INPUT_LEN);
    Ok(cleaned)
}

fn invalid(kind: ErrorKind, message: impl Into<String>) -> GitError {
    GitError::new(kind, message.into()).with_context(ErrorContext::new("sanitize_input"))
}

/// The shell-out Git backend's last line of defense before composing an
/// argument vector: reject anything that still contains metacharacters or a
/// dangerous pattern after `sanitize_input`.
#[derive(Debug, thiserror::Error)]
#[error("argument rejected by command-injection check: {0}")]
pub struct CommandInjectionError(pub String);

pub fn check_command_injection(arg: &str) -> Result<(), CommandInjectionError> {
    if arg.chars().any(|c| SHELL_METACHARS.contains(&c) || c == '\n' || c == '\0') {
        return Err(CommandInjectionError(arg.to_string()));
    }
    for pattern in DANGEROUS_PATTERNS.iter() {
        if pattern.is_match(arg) {
            return Err(CommandInjectionError(arg.to_string()));
        }
    }
    Ok(())
}
