//! Bounded-concurrency task scheduler sitting on top of the persistent
//! store. Grounded on the teacher's background-poller shape
//! (`PrMonitorService::spawn`) for the watchdog/cleanup loop, generalized
//! from PR polling to task admission and timeout enforcement.

use std::{
    collections::BinaryHeap,
    cmp::Ordering,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use git_error::{ErrorKind, GitError};
use git_store::{CreateTask, GitStore, Task, TaskStatus, TaskUpdate};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub type TaskWork =
    Pin<Box<dyn Future<Output = Result<Option<serde_json::Value>, GitError>> + Send>>;

/// Fired on task state transitions. Errors from these are logged, never
/// propagated — a bad integration must not corrupt task state.
#[async_trait]
pub trait TaskCallbacks: Send + Sync {
    async fn on_start(&self, _task: &Task) {}
    async fn on_complete(&self, _task: &Task) {}
    async fn on_error(&self, _task: &Task, _message: &str) {}
}

struct NoopCallbacks;

#[async_trait]
impl TaskCallbacks for NoopCallbacks {}

#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    pub max_concurrent_tasks: usize,
    pub task_timeout_seconds: u64,
    pub result_retention_seconds: i64,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStats {
    pub active_tasks: usize,
    pub max_concurrent: usize,
    pub available_slots: usize,
    pub timeout_seconds: u64,
    pub result_retention_seconds: i64,
}

struct PendingEntry {
    priority: i32,
    created_at: chrono::DateTime<Utc>,
    id: Uuid,
    work: TaskWork,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.created_at == other.created_at
    }
}
impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority first, and among ties
        // the earlier created_at must sort "greater" (i.e. FIFO).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
    }
}

struct RunningHandle {
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

pub struct TaskManager {
    config: TaskManagerConfig,
    store: GitStore,
    semaphore: Arc<Semaphore>,
    pending: Mutex<BinaryHeap<PendingEntry>>,
    notify: Notify,
    running: DashMap<Uuid, RunningHandle>,
    callbacks: Arc<dyn TaskCallbacks>,
}

impl TaskManager {
    pub fn new(config: TaskManagerConfig, store: GitStore) -> Arc<Self> {
        Self::with_callbacks(config, store, Arc::new(NoopCallbacks))
    }

    pub fn with_callbacks(
        config: TaskManagerConfig,
        store: GitStore,
        callbacks: Arc<dyn TaskCallbacks>,
    ) -> Arc<Self> {
        let max = config.max_concurrent_tasks;
        Arc::new(Self {
            config,
            store,
            semaphore: Arc::new(Semaphore::new(max)),
            pending: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            running: DashMap::new(),
            callbacks,
        })
    }

    /// Spawns the dispatcher that admits queued work as permits free up,
    /// and the watchdog/cleanup loop.
    pub fn spawn(self: &Arc<Self>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        (self.clone().spawn_dispatcher(), self.clone().spawn_cleanup_loop())
    }

    fn spawn_dispatcher(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let entry = {
                    let mut pending = self.pending.lock().await;
                    pending.pop()
                };
                let Some(entry) = entry else {
                    self.notify.notified().await;
                    continue;
                };

                let permit = match self.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let manager = self.clone();
                let cancel = CancellationToken::new();
                let child_cancel = cancel.clone();
                let id = entry.id;
                let work = entry.work;

                let join = tokio::spawn(async move {
                    let _permit = permit;
                    manager.run_admitted(id, work, child_cancel).await;
                });

                self.running.insert(id, RunningHandle { cancel, join });
            }
        })
    }

    fn spawn_cleanup_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.config.cleanup_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.store.cleanup_expired_tasks(self.config.result_retention_seconds).await {
                    error!("cleanup_expired_tasks failed: {e}");
                }
                if let Err(e) = self.run_watchdog().await {
                    error!("task watchdog failed: {e}");
                }
            }
        })
    }

    async fn run_watchdog(&self) -> Result<(), GitError> {
        let running = self.store.list_tasks(Some(TaskStatus::Running), i64::MAX, 0).await?;
        let now = Utc::now();
        for task in running {
            let Some(started_at) = task.started_at else { continue };
            let deadline = started_at + chrono::Duration::seconds(self.config.task_timeout_seconds as i64);
            if now > deadline {
                if let Some((_, handle)) = self.running.remove(&task.id) {
                    handle.cancel.cancel();
                    handle.join.abort();
                }
                let message = format!("Task timed out after {} seconds", self.config.task_timeout_seconds);
                self.fail_task(task.id, &message).await?;
            }
        }
        Ok(())
    }

    async fn run_admitted(&self, id: Uuid, work: TaskWork, cancel: CancellationToken) {
        if let Err(e) = self.start_task(id).await {
            error!("failed to start task {id}: {e}");
            return;
        }

        let timeout = Duration::from_secs(self.config.task_timeout_seconds);
        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, work) => result,
            _ = cancel.cancelled() => {
                let _ = self.cancel_task(id).await;
                return;
            }
        };

        match outcome {
            Ok(Ok(result)) => {
                if let Err(e) = self.complete_task(id, result).await {
                    error!("failed to complete task {id}: {e}");
                }
            }
            Ok(Err(err)) => {
                if let Err(e) = self.fail_task(id, &err.message).await {
                    error!("failed to fail task {id}: {e}");
                }
            }
            Err(_) => {
                let message = format!("Task timed out after {} seconds", self.config.task_timeout_seconds);
                if let Err(e) = self.fail_task(id, &message).await {
                    error!("failed to fail timed-out task {id}: {e}");
                }
            }
        }

        self.running.remove(&id);
    }

    pub async fn create_task(
        &self,
        operation: impl Into<String>,
        params: serde_json::Value,
        workspace_path: Option<String>,
        priority: i32,
    ) -> Result<Task, GitError> {
        self.store
            .create_task(CreateTask { id: Uuid::new_v4(), operation: operation.into(), workspace_path, params, priority })
            .await
    }

    pub async fn submit_task(&self, id: Uuid, work: TaskWork) -> Result<(), GitError> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| GitError::task_not_found(id.to_string()))?;

        {
            let mut pending = self.pending.lock().await;
            pending.push(PendingEntry { priority: task.priority, created_at: task.created_at, id, work });
        }
        self.notify.notify_one();
        Ok(())
    }

    pub async fn start_task(&self, id: Uuid) -> Result<Task, GitError> {
        let task = self
            .store
            .update_task(
                id,
                TaskUpdate { status: Some(TaskStatus::Running), started_at: Some(Utc::now()), ..Default::default() },
            )
            .await?;
        self.callbacks.on_start(&task).await;
        Ok(task)
    }

    pub async fn complete_task(&self, id: Uuid, result: Option<serde_json::Value>) -> Result<Task, GitError> {
        let task = self
            .store
            .update_task(
                id,
                TaskUpdate {
                    status: Some(TaskStatus::Completed),
                    progress: Some(100),
                    result: Some(result),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.callbacks.on_complete(&task).await;
        Ok(task)
    }

    pub async fn fail_task(&self, id: Uuid, message: &str) -> Result<Task, GitError> {
        let task = self
            .store
            .update_task(
                id,
                TaskUpdate {
                    status: Some(TaskStatus::Failed),
                    error_message: Some(Some(message.to_string())),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.callbacks.on_error(&task, message).await;
        Ok(task)
    }

    /// Cancels the in-flight work (if any) and marks the task cancelled.
    /// Idempotent: returns `true` for the call that actually performs the
    /// transition, `false` on every later call against an already-terminal
    /// task (mirrors `WorkspaceManager::release`'s true-then-false contract).
    pub async fn cancel_task(&self, id: Uuid) -> Result<bool, GitError> {
        if let Some((_, handle)) = self.running.remove(&id) {
            handle.cancel.cancel();
            handle.join.abort();
        }

        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| GitError::task_not_found(id.to_string()))?;

        if task.status.is_terminal() {
            return Ok(false);
        }

        self.store
            .update_task(
                id,
                TaskUpdate { status: Some(TaskStatus::Cancelled), completed_at: Some(Utc::now()), ..Default::default() },
            )
            .await?;
        Ok(true)
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>, GitError> {
        self.store.get_task(id).await
    }

    pub async fn get_task_result(&self, id: Uuid) -> Result<Option<serde_json::Value>, GitError> {
        Ok(self.store.get_task(id).await?.and_then(|t| t.result))
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64, offset: i64) -> Result<Vec<Task>, GitError> {
        self.store.list_tasks(status, limit, offset).await
    }

    pub async fn get_active_tasks(&self) -> Result<Vec<Task>, GitError> {
        self.store.list_tasks(Some(TaskStatus::Running), i64::MAX, 0).await
    }

    pub async fn get_queued_tasks(&self, limit: i64) -> Result<Vec<Task>, GitError> {
        self.store.get_pending_tasks(limit).await
    }

    pub fn get_stats(&self) -> TaskStats {
        let available_slots = self.semaphore.available_permits();
        TaskStats {
            active_tasks: self.config.max_concurrent_tasks - available_slots,
            max_concurrent: self.config.max_concurrent_tasks,
            available_slots,
            timeout_seconds: self.config.task_timeout_seconds,
            result_retention_seconds: self.config.result_retention_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TaskManagerConfig {
        TaskManagerConfig {
            max_concurrent_tasks: 2,
            task_timeout_seconds: 5,
            result_retention_seconds: 3600,
            cleanup_interval_seconds: 60,
        }
    }

    #[tokio::test]
    async fn create_and_submit_task_completes() {
        let store = GitStore::open_in_memory().await.unwrap();
        let manager = TaskManager::new(config(), store);
        manager.spawn();

        let task = manager.create_task("status", serde_json::json!({}), None, 0).await.unwrap();
        manager
            .submit_task(task.id, Box::pin(async { Ok(Some(serde_json::json!({"ok": true}))) }))
            .await
            .unwrap();

        for _ in 0..20 {
            let current = manager.get_task(task.id).await.unwrap().unwrap();
            if current.status.is_terminal() {
                assert_eq!(current.status, TaskStatus::Completed);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task never reached a terminal state");
    }

    #[tokio::test]
    async fn cancel_task_before_admission_is_idempotent() {
        let store = GitStore::open_in_memory().await.unwrap();
        let manager = TaskManager::new(config(), store);

        let task = manager.create_task("fetch", serde_json::json!({}), None, 0).await.unwrap();
        assert!(manager.cancel_task(task.id).await.unwrap());
        assert!(!manager.cancel_task(task.id).await.unwrap());

        let final_task = manager.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(final_task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn pending_entry_orders_by_priority_then_fifo() {
        let now = chrono::Utc::now();
        let mut heap = BinaryHeap::new();
        heap.push(PendingEntry { priority: 0, created_at: now, id: Uuid::new_v4(), work: Box::pin(async { Ok(None) }) });
        heap.push(PendingEntry {
            priority: 5,
            created_at: now + chrono::Duration::seconds(1),
            id: Uuid::new_v4(),
            work: Box::pin(async { Ok(None) }),
        });
        assert_eq!(heap.pop().unwrap().priority, 5);
    }
}
