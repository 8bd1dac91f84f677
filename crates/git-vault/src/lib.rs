//! Credential resolution, storage, and audit logging for Git authentication.
//!
//! Secret fields are wrapped in [`secrecy::SecretString`] so they never leak
//! into `Debug`/`Display`/serialization by accident, and `clear`/`rotate`
//! additionally scrub the exposed buffer with [`zeroize`] before dropping it
//! — secrecy's own zeroize-on-drop only covers the storage it controls, not
//! a copy we've exposed for writing to disk or into a git2 callback.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use git_error::{ErrorKind, GitError};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use zeroize::Zeroize;

pub const ENV_GIT_TOKEN: &str = "GIT_TOKEN";
pub const ENV_MCP_GIT_TOKEN: &str = "MCP_GIT_GIT_TOKEN";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_GIT_USERNAME: &str = "GIT_USERNAME";
pub const ENV_GIT_PASSWORD: &str = "GIT_PASSWORD";
pub const ENV_SSH_KEY_PATH: &str = "SSH_KEY_PATH";
pub const ENV_SSH_PASSPHRASE: &str = "SSH_PASSPHRASE";
pub const ENV_SSH_AUTH_SOCK: &str = "SSH_AUTH_SOCK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Token,
    SshKey,
    SshAgent,
    UsernamePassword,
}

/// A resolved credential. `Debug` is hand-rolled to redact every secret
/// field; never derive it.
#[derive(Clone)]
pub struct Credential {
    pub auth_type: AuthType,
    pub token: Option<SecretString>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub ssh_key_path: Option<PathBuf>,
    pub ssh_key_passphrase: Option<SecretString>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("auth_type", &self.auth_type)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ssh_key_path", &self.ssh_key_path)
            .field("ssh_key_passphrase", &self.ssh_key_passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credential {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::Token,
            token: Some(SecretString::from(token.into())),
            username: None,
            password: None,
            ssh_key_path: None,
            ssh_key_passphrase: None,
        }
    }

    pub fn ssh_key(path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self {
            auth_type: AuthType::SshKey,
            token: None,
            username: None,
            password: None,
            ssh_key_path: Some(path.into()),
            ssh_key_passphrase: passphrase.map(SecretString::from),
        }
    }

    pub fn ssh_agent() -> Self {
        Self {
            auth_type: AuthType::SshAgent,
            token: None,
            username: None,
            password: None,
            ssh_key_path: None,
            ssh_key_passphrase: None,
        }
    }

    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            auth_type: AuthType::UsernamePassword,
            token: None,
            username: Some(username.into()),
            password: Some(SecretString::from(password.into())),
            ssh_key_path: None,
            ssh_key_passphrase: None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret())
    }

    /// `clear`/`rotate` overwrite the exposed plaintext copy multiple times
    /// before the `SecretString` itself is dropped.
    fn scrub(&mut self) {
        if let Some(token) = self.token.take() {
            let mut buf = token.expose_secret().to_string();
            for _ in 0..3 {
                buf.zeroize();
            }
        }
        if let Some(password) = self.password.take() {
            let mut buf = password.expose_secret().to_string();
            for _ in 0..3 {
                buf.zeroize();
            }
        }
        if let Some(passphrase) = self.ssh_key_passphrase.take() {
            let mut buf = passphrase.expose_secret().to_string();
            for _ in 0..3 {
                buf.zeroize();
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialStats {
    pub auth_type: Option<AuthType>,
    pub is_authenticated: bool,
    pub access_count: u64,
    pub age_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AuditEvent<'a> {
    event: &'a str,
    auth_type: Option<AuthType>,
    access_count: u64,
    age_seconds: Option<i64>,
    timestamp: DateTime<Utc>,
}

struct VaultState {
    credential: Option<Credential>,
    set_at: Option<DateTime<Utc>>,
    access_count: u64,
}

/// Loads, caches, and audits a single active [`Credential`].
///
/// Resolution order on [`CredentialManager::get`] with no cached value:
/// `GIT_TOKEN`/`MCP_GIT_GIT_TOKEN` (first one set wins) → `GITHUB_TOKEN` →
/// `SSH_KEY_PATH` pointing at an existing file → `SSH_AUTH_SOCK` presence →
/// `GIT_USERNAME`+`GIT_PASSWORD` → `None`.
pub struct CredentialManager {
    state: Mutex<VaultState>,
}

impl Default for CredentialManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VaultState {
                credential: None,
                set_at: None,
                access_count: 0,
            }),
        }
    }

    /// Resolves a credential from the environment without caching it.
    pub fn load_from_env() -> Option<Credential> {
        if let Ok(token) = std::env::var(ENV_GIT_TOKEN).or_else(|_| std::env::var(ENV_MCP_GIT_TOKEN))
            && !token.is_empty()
        {
            return Some(Credential::token(token));
        }
        if let Ok(token) = std::env::var(ENV_GITHUB_TOKEN)
            && !token.is_empty()
        {
            return Some(Credential::token(token));
        }
        if let Ok(path) = std::env::var(ENV_SSH_KEY_PATH)
            && Path::new(&path).is_file()
        {
            let passphrase = std::env::var(ENV_SSH_PASSPHRASE).ok();
            return Some(Credential::ssh_key(path, passphrase));
        }
        if std::env::var(ENV_SSH_AUTH_SOCK).is_ok() {
            return Some(Credential::ssh_agent());
        }
        if let (Ok(username), Ok(password)) =
            (std::env::var(ENV_GIT_USERNAME), std::env::var(ENV_GIT_PASSWORD))
        {
            return Some(Credential::username_password(username, password));
        }
        None
    }

    pub fn get(&self, force_refresh: bool) -> Option<Credential> {
        let mut state = self.state.lock().unwrap();
        if force_refresh || state.credential.is_none() {
            state.credential = Self::load_from_env();
            state.set_at = state.credential.as_ref().map(|_| Utc::now());
        }
        state.access_count += 1;
        let result = state.credential.clone();
        let auth_type = result.as_ref().map(|c| c.auth_type);
        let age = Self::age_seconds(&state);
        let access_count = state.access_count;
        drop(state);
        Self::audit("get", auth_type, access_count, age);
        result
    }

    pub fn set(&self, credential: Credential) {
        let mut state = self.state.lock().unwrap();
        let auth_type = credential.auth_type;
        state.credential = Some(credential);
        state.set_at = Some(Utc::now());
        state.access_count += 1;
        let access_count = state.access_count;
        drop(state);
        Self::audit("set", Some(auth_type), access_count, Some(0));
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        let auth_type = state.credential.as_ref().map(|c| c.auth_type);
        if let Some(mut credential) = state.credential.take() {
            credential.scrub();
        }
        state.set_at = None;
        state.access_count += 1;
        let access_count = state.access_count;
        drop(state);
        Self::audit("clear", auth_type, access_count, None);
    }

    pub fn rotate(&self, new_credential: Credential) {
        self.clear();
        self.set(new_credential);
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().unwrap().credential.is_some()
    }

    pub fn get_auth_type(&self) -> Option<AuthType> {
        self.state.lock().unwrap().credential.as_ref().map(|c| c.auth_type)
    }

    pub fn age(&self) -> Option<i64> {
        Self::age_seconds(&self.state.lock().unwrap())
    }

    pub fn stats(&self) -> CredentialStats {
        let state = self.state.lock().unwrap();
        CredentialStats {
            auth_type: state.credential.as_ref().map(|c| c.auth_type),
            is_authenticated: state.credential.is_some(),
            access_count: state.access_count,
            age_seconds: Self::age_seconds(&state),
        }
    }

    fn age_seconds(state: &VaultState) -> Option<i64> {
        state.set_at.map(|set_at| (Utc::now() - set_at).num_seconds())
    }

    fn audit(event: &str, auth_type: Option<AuthType>, access_count: u64, age_seconds: Option<i64>) {
        let record = AuditEvent {
            event,
            auth_type,
            access_count,
            age_seconds,
            timestamp: Utc::now(),
        };
        tracing::info!(target: "git_vault::audit", auth_type = ?record.auth_type, access_count, age_seconds, event, "credential audit event");
    }
}

/// SSH key locations probed when no explicit `SSH_KEY_PATH` is set.
pub fn default_ssh_key_candidates() -> Vec<PathBuf> {
    let Some(home) = dirs_home() else {
        return Vec::new();
    };
    ["id_ed25519", "id_rsa", "id_ecdsa"]
        .into_iter()
        .map(|name| home.join(".ssh").join(name))
        .collect()
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Maps an I/O or environment failure during credential resolution into the
/// closed error taxonomy's auth-failure kind.
pub fn auth_error(message: impl Into<String>) -> GitError {
    GitError::new(ErrorKind::AuthFailed, message.into())
}
