//! Owns the directories Git operations run inside: allocation, quota
//! enforcement, and idle reclamation. Grounded on the per-path locking
//! idiom of the teacher's worktree manager, generalized from worktrees to
//! plain workspace directories.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use git_error::{ErrorKind, GitError};
use git_store::{CreateWorkspace, GitStore, Workspace};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_MAX_PER_WORKSPACE_FLOOR: u64 = 1024 * 1024 * 1024; // 1 GiB
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStrategy {
    #[default]
    Lru,
    Fifo,
}

#[derive(Debug, Clone)]
pub struct WorkspaceManagerConfig {
    pub root_path: PathBuf,
    pub max_size_bytes: u64,
    pub retention_seconds: i64,
    pub cleanup_strategy: CleanupStrategy,
    pub max_workspaces: Option<usize>,
    pub max_per_workspace_bytes: Option<u64>,
}

impl WorkspaceManagerConfig {
    fn per_workspace_cap(&self) -> u64 {
        self.max_per_workspace_bytes
            .unwrap_or_else(|| (self.max_size_bytes / 10).max(DEFAULT_MAX_PER_WORKSPACE_FLOOR))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceUsage {
    pub total: i64,
    pub total_size_bytes: i64,
    pub max_size_bytes: i64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSpaceInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct CleanupReport {
    pub count: u64,
    pub freed_bytes: i64,
}

pub struct WorkspaceManager {
    config: WorkspaceManagerConfig,
    store: GitStore,
    locks: DashMap<Uuid, Arc<AsyncMutex<()>>>,
}

impl WorkspaceManager {
    pub fn new(config: WorkspaceManagerConfig, store: GitStore) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            locks: DashMap::new(),
        })
    }

    fn lock_for(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        self.locks.entry(id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Spawns the 5-minute cleanup timer; mirrors the teacher's
    /// `PrMonitorService::spawn` poll-loop shape.
    pub fn spawn_cleanup_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                match manager.cleanup_expired().await {
                    Ok(report) => {
                        if report.count > 0 {
                            info!(count = report.count, freed_bytes = report.freed_bytes, "cleaned up expired workspaces");
                        }
                    }
                    Err(e) => warn!("workspace cleanup_expired failed: {e}"),
                }
                if let Err(e) = manager.cleanup_by_size().await {
                    warn!("workspace cleanup_by_size failed: {e}");
                }
            }
        })
    }

    pub async fn allocate(&self) -> Result<Workspace, GitError> {
        tokio::fs::create_dir_all(&self.config.root_path)
            .await
            .map_err(|e| GitError::new(ErrorKind::SystemError, format!("failed to create workspace root: {e}")))?;

        for _ in 0..8 {
            let id = Uuid::new_v4();
            let path = self.config.root_path.join(id.to_string());
            match tokio::fs::create_dir(&path).await {
                Ok(()) => {
                    // The count-cap check and the insert happen inside one
                    // store transaction, so two concurrent callers can't both
                    // see room under max_workspaces and both succeed.
                    let result = self
                        .store
                        .create_workspace_checked(
                            CreateWorkspace { id, path: path.to_string_lossy().into_owned() },
                            self.config.max_workspaces,
                        )
                        .await;
                    if result.is_err() {
                        let _ = tokio::fs::remove_dir(&path).await;
                    }
                    return result;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(GitError::new(ErrorKind::SystemError, format!("failed to create workspace directory: {e}")));
                }
            }
        }

        Err(GitError::new(ErrorKind::SystemError, "exhausted id collisions allocating workspace"))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Workspace>, GitError> {
        self.store.get_workspace(id).await
    }

    pub async fn get_by_path(&self, path: &str) -> Result<Option<Workspace>, GitError> {
        self.store.get_workspace_by_path(path).await
    }

    pub async fn touch(&self, id: Uuid) -> Result<(), GitError> {
        let _guard = self.lock_for(id).lock().await;
        self.store.touch_workspace(id).await
    }

    /// Recomputes a workspace's on-disk size in a worker thread and
    /// persists it.
    pub async fn update_size(&self, id: Uuid, path: Option<PathBuf>) -> Result<i64, GitError> {
        let _guard = self.lock_for(id).lock().await;
        let path = match path {
            Some(p) => p,
            None => {
                let ws = self
                    .store
                    .get_workspace(id)
                    .await?
                    .ok_or_else(|| GitError::task_not_found(id.to_string()))?;
                PathBuf::from(ws.path)
            }
        };

        let size = tokio::task::spawn_blocking(move || directory_size(&path))
            .await
            .map_err(|e| GitError::new(ErrorKind::SystemError, format!("size walk join error: {e}")))?;

        self.store.update_workspace_size(id, size as i64).await?;
        Ok(size as i64)
    }

    pub async fn release(&self, id: Uuid) -> Result<bool, GitError> {
        let _guard = self.lock_for(id).lock().await;
        if let Some(ws) = self.store.get_workspace(id).await? {
            let path = PathBuf::from(&ws.path);
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove workspace directory {}: {e}", path.display());
                }
            }
        }
        let existed = self.store.delete_workspace(id).await?;
        self.locks.remove(&id);
        Ok(existed)
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<Workspace>, GitError> {
        self.store.list_workspaces(limit, 0).await
    }

    pub async fn get_usage(&self) -> Result<WorkspaceUsage, GitError> {
        let total = self.store.list_workspaces(i64::MAX, 0).await?.len() as i64;
        let total_size_bytes = self.store.get_workspace_total_size().await?;
        let max_size_bytes = self.config.max_size_bytes as i64;
        let usage_percent = if max_size_bytes > 0 {
            (total_size_bytes as f64 / max_size_bytes as f64) * 100.0
        } else {
            0.0
        };
        Ok(WorkspaceUsage { total, total_size_bytes, max_size_bytes, usage_percent })
    }

    pub fn get_disk_space_info(&self) -> Result<DiskSpaceInfo, GitError> {
        let total = fs2::total_space(&self.config.root_path)
            .map_err(|e| GitError::new(ErrorKind::SystemError, format!("statfs failed: {e}")))?;
        let free = fs2::free_space(&self.config.root_path)
            .map_err(|e| GitError::new(ErrorKind::SystemError, format!("statfs failed: {e}")))?;
        let used = total.saturating_sub(free);
        let usage_percent = if total > 0 { (used as f64 / total as f64) * 100.0 } else { 0.0 };
        Ok(DiskSpaceInfo { total, used, free, usage_percent })
    }

    pub fn validate_workspace_path(&self, p: &Path) -> bool {
        git_sanitize::sanitize_path(p, &self.config.root_path).is_ok()
    }

    pub async fn cleanup_expired(&self) -> Result<CleanupReport, GitError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(self.config.retention_seconds);
        let workspaces = self.store.list_workspaces(i64::MAX, 0).await?;
        let mut report = CleanupReport::default();
        for ws in workspaces {
            if ws.last_accessed_at < cutoff {
                let size = ws.size_bytes;
                if self.release(ws.id).await? {
                    report.count += 1;
                    report.freed_bytes += size;
                }
            }
        }
        Ok(report)
    }

    pub async fn cleanup_by_size(&self) -> Result<CleanupReport, GitError> {
        let mut total = self.store.get_workspace_total_size().await?;
        let mut report = CleanupReport::default();
        if (total as u64) <= self.config.max_size_bytes {
            return Ok(report);
        }

        let target = (self.config.max_size_bytes * 80) / 100;
        let candidates = self.oldest_candidates().await?;

        for ws in candidates {
            if (total as u64) <= target {
                break;
            }
            let size = ws.size_bytes;
            if self.release(ws.id).await? {
                report.count += 1;
                report.freed_bytes += size;
                total -= size;
            }
        }
        Ok(report)
    }

    async fn oldest_candidates(&self) -> Result<Vec<Workspace>, GitError> {
        match self.config.cleanup_strategy {
            CleanupStrategy::Lru => self.store.get_oldest_workspaces(i64::MAX).await,
            CleanupStrategy::Fifo => {
                let mut workspaces = self.store.list_workspaces(i64::MAX, 0).await?;
                workspaces.sort_by_key(|w| w.created_at);
                Ok(workspaces)
            }
        }
    }

    pub async fn enforce_workspace_size_limit(&self, id: Uuid) -> Result<bool, GitError> {
        let ws = match self.store.get_workspace(id).await? {
            Some(ws) => ws,
            None => return Ok(false),
        };
        let cap = self.config.per_workspace_cap() as i64;
        let ratio = if cap > 0 { ws.size_bytes as f64 / cap as f64 } else { 0.0 };

        if ratio > 1.2 {
            self.release(id).await?;
            return Ok(true);
        }
        if ratio >= 1.0 {
            warn!(
                workspace_id = %id,
                size_bytes = ws.size_bytes,
                cap_bytes = cap,
                "workspace at {:.0}% of its per-workspace cap",
                ratio * 100.0
            );
        }
        Ok(false)
    }
}

fn directory_size(path: &Path) -> u64 {
    let mut total = 0u64;
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else { continue };
        if metadata.is_dir() {
            total += directory_size(&entry.path());
        } else {
            total += metadata.len();
        }
    }
    debug!(path = %path.display(), bytes = total, "computed directory size");
    total
}
