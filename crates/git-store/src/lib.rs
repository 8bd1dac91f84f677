use std::str::FromStr;

use chrono::Utc;
use git_error::{ErrorKind, GitError};
use sqlx::{
    Pool, Row, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use uuid::Uuid;

pub mod models;

pub use models::*;

const DEFAULT_DATABASE_PATH: &str = "git_mcp.db";

fn store_error(op: &'static str, err: sqlx::Error) -> GitError {
    GitError::new(ErrorKind::SystemError, format!("{op} failed: {err}"))
}

/// Process-embedded store for tasks, workspaces, and their operation logs.
///
/// Opened in write-ahead-log mode so readers never block writers; the
/// schema (tables + indexes) is created on first connect if missing.
#[derive(Clone)]
pub struct GitStore {
    pool: Pool<Sqlite>,
}

impl GitStore {
    pub async fn new() -> Result<GitStore, GitError> {
        let database_path = std::env::var("MCP_GIT_DATABASE_PATH")
            .unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());
        Self::open(&database_path).await
    }

    pub async fn open(database_path: &str) -> Result<GitStore, GitError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{database_path}"))
            .map_err(|e| store_error("connect", e))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| store_error("connect", e))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| GitError::new(ErrorKind::SystemError, format!("migration failed: {e}")))?;

        Ok(GitStore { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<GitStore, GitError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| store_error("connect", e))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| store_error("connect", e))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| GitError::new(ErrorKind::SystemError, format!("migration failed: {e}")))?;
        Ok(GitStore { pool })
    }

    // ---- tasks ---------------------------------------------------------

    pub async fn create_task(&self, t: CreateTask) -> Result<Task, GitError> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO tasks (id, operation, status, workspace_path, params, result, \
             error_message, progress, priority, created_at, started_at, completed_at) \
             VALUES (?, ?, 'queued', ?, ?, NULL, NULL, 0, ?, ?, NULL, NULL)",
        )
        .bind(t.id.to_string())
        .bind(&t.operation)
        .bind(&t.workspace_path)
        .bind(t.params.to_string())
        .bind(t.priority as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("create_task", e))?;

        self.get_task(t.id)
            .await?
            .ok_or_else(|| GitError::new(ErrorKind::SystemError, "task vanished after insert"))
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>, GitError> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("get_task", e))?;

        row.map(Task::try_from)
            .transpose()
            .map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }

    pub async fn get_tasks_batch(&self, ids: &[Uuid]) -> Result<Vec<Task>, GitError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat_n("?", ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT * FROM tasks WHERE id IN ({placeholders})");
        let mut query = sqlx::query_as::<_, TaskRow>(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("get_tasks_batch", e))?;

        rows.into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }

    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>, GitError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, TaskRow>(
                "SELECT * FROM tasks WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(status.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, TaskRow>(
                "SELECT * FROM tasks ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| store_error("list_tasks", e))?;

        rows.into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }

    /// Applies only the whitelisted fields present on `update`; an entirely
    /// empty update is a no-op rather than an error.
    pub async fn update_task(&self, id: Uuid, update: TaskUpdate) -> Result<Task, GitError> {
        let mut sets: Vec<String> = Vec::new();
        let mut strings: Vec<String> = Vec::new();
        let mut opt_strings: Vec<Option<String>> = Vec::new();
        let mut ints: Vec<i64> = Vec::new();
        let mut opt_ints: Vec<Option<i64>> = Vec::new();

        if let Some(status) = update.status {
            sets.push("status = ?".into());
            strings.push(status.to_string());
        }
        if let Some(progress) = update.progress {
            sets.push("progress = ?".into());
            ints.push(progress as i64);
        }
        if let Some(result) = update.result {
            sets.push("result = ?".into());
            opt_strings.push(result.map(|v| v.to_string()));
        }
        if let Some(error_message) = update.error_message {
            sets.push("error_message = ?".into());
            opt_strings.push(error_message);
        }
        if let Some(started_at) = update.started_at {
            sets.push("started_at = ?".into());
            opt_ints.push(Some(started_at.timestamp()));
        }
        if let Some(completed_at) = update.completed_at {
            sets.push("completed_at = ?".into());
            opt_ints.push(Some(completed_at.timestamp()));
        }

        if sets.is_empty() {
            return self
                .get_task(id)
                .await?
                .ok_or_else(|| GitError::task_not_found(id.to_string()));
        }

        let sql = format!("UPDATE tasks SET {} WHERE id = ?", sets.join(", "));
        let mut query = sqlx::query(&sql);
        for s in &strings {
            query = query.bind(s);
        }
        for i in &ints {
            query = query.bind(i);
        }
        for s in &opt_strings {
            query = query.bind(s);
        }
        for i in &opt_ints {
            query = query.bind(i);
        }
        query = query.bind(id.to_string());

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("update_task", e))?;
        if result.rows_affected() == 0 {
            return Err(GitError::task_not_found(id.to_string()));
        }

        self.get_task(id)
            .await?
            .ok_or_else(|| GitError::task_not_found(id.to_string()))
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<bool, GitError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("delete_task", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// Unlike `list_tasks` (most-recent-first, for observability), this
    /// orders the way the admission dispatcher must drain the queue:
    /// highest priority first, ties broken oldest-first.
    pub async fn get_pending_tasks(&self, limit: i64) -> Result<Vec<Task>, GitError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status = ? ORDER BY priority DESC, created_at ASC LIMIT ?",
        )
        .bind(TaskStatus::Queued.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("get_pending_tasks", e))?;

        rows.into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }

    pub async fn cleanup_expired_tasks(&self, retention_seconds: i64) -> Result<u64, GitError> {
        let cutoff = Utc::now().timestamp() - retention_seconds;
        let result = sqlx::query(
            "DELETE FROM tasks WHERE status IN ('completed', 'failed', 'cancelled') \
             AND completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("cleanup_expired_tasks", e))?;
        Ok(result.rows_affected())
    }

    // ---- workspaces ------------------------------------------------------

    pub async fn create_workspace(&self, w: CreateWorkspace) -> Result<Workspace, GitError> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO workspaces (id, path, size_bytes, last_accessed_at, created_at, metadata) \
             VALUES (?, ?, 0, ?, ?, '{}')",
        )
        .bind(w.id.to_string())
        .bind(&w.path)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("create_workspace", e))?;

        self.get_workspace(w.id).await?.ok_or_else(|| {
            GitError::new(ErrorKind::SystemError, "workspace vanished after insert")
        })
    }

    /// Atomically checks the workspace count against `max_workspaces` and
    /// inserts, inside one transaction, so concurrent callers can't both
    /// observe room under the cap and both insert, overshooting it.
    pub async fn create_workspace_checked(
        &self,
        w: CreateWorkspace,
        max_workspaces: Option<usize>,
    ) -> Result<Workspace, GitError> {
        let mut tx = self.pool.begin().await.map_err(|e| store_error("create_workspace_checked", e))?;

        if let Some(max) = max_workspaces {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workspaces")
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| store_error("create_workspace_checked", e))?;
            if count as usize >= max {
                return Err(GitError::new(
                    ErrorKind::ResourceExhausted,
                    format!("workspace cap of {max} reached"),
                ));
            }
        }

        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO workspaces (id, path, size_bytes, last_accessed_at, created_at, metadata) \
             VALUES (?, ?, 0, ?, ?, '{}')",
        )
        .bind(w.id.to_string())
        .bind(&w.path)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_error("create_workspace_checked", e))?;

        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(w.id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| store_error("create_workspace_checked", e))?;

        tx.commit().await.map_err(|e| store_error("create_workspace_checked", e))?;

        Workspace::try_from(row).map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }

    pub async fn get_workspace(&self, id: Uuid) -> Result<Option<Workspace>, GitError> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("get_workspace", e))?;

        row.map(Workspace::try_from)
            .transpose()
            .map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }

    pub async fn get_workspace_by_path(&self, path: &str) -> Result<Option<Workspace>, GitError> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("get_workspace_by_path", e))?;

        row.map(Workspace::try_from)
            .transpose()
            .map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }

    pub async fn touch_workspace(&self, id: Uuid) -> Result<(), GitError> {
        sqlx::query("UPDATE workspaces SET last_accessed_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("touch_workspace", e))?;
        Ok(())
    }

    pub async fn update_workspace_size(&self, id: Uuid, size_bytes: i64) -> Result<(), GitError> {
        sqlx::query("UPDATE workspaces SET size_bytes = ? WHERE id = ?")
            .bind(size_bytes)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("update_workspace_size", e))?;
        Ok(())
    }

    pub async fn delete_workspace(&self, id: Uuid) -> Result<bool, GitError> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("delete_workspace", e))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_workspaces(&self, limit: i64, offset: i64) -> Result<Vec<Workspace>, GitError> {
        let rows = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces ORDER BY last_accessed_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list_workspaces", e))?;

        rows.into_iter()
            .map(Workspace::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }

    pub async fn get_oldest_workspaces(&self, n: i64) -> Result<Vec<Workspace>, GitError> {
        let rows = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces ORDER BY last_accessed_at ASC LIMIT ?",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("get_oldest_workspaces", e))?;

        rows.into_iter()
            .map(Workspace::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }

    pub async fn get_workspace_total_size(&self) -> Result<i64, GitError> {
        let row = sqlx::query("SELECT COALESCE(SUM(size_bytes), 0) AS total FROM workspaces")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("get_workspace_total_size", e))?;
        Ok(row.try_get::<i64, _>("total").unwrap_or(0))
    }

    pub async fn get_workspace_info_batch(&self, ids: &[Uuid]) -> Result<Vec<Workspace>, GitError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat_n("?", ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT * FROM workspaces WHERE id IN ({placeholders})");
        let mut query = sqlx::query_as::<_, WorkspaceRow>(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("get_workspace_info_batch", e))?;

        rows.into_iter()
            .map(Workspace::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }

    // ---- operation logs ----------------------------------------------

    pub async fn log_operation(
        &self,
        task_id: Uuid,
        operation: &str,
        level: LogLevel,
        message: &str,
    ) -> Result<(), GitError> {
        sqlx::query(
            "INSERT INTO operation_logs (task_id, operation, level, message, timestamp) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(task_id.to_string())
        .bind(operation)
        .bind(level.to_string())
        .bind(message)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("log_operation", e))?;
        Ok(())
    }

    pub async fn get_operation_logs(
        &self,
        task_id: Uuid,
        limit: i64,
    ) -> Result<Vec<OperationLogEntry>, GitError> {
        let rows = sqlx::query_as::<_, OperationLogRow>(
            "SELECT * FROM operation_logs WHERE task_id = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(task_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("get_operation_logs", e))?;

        rows.into_iter()
            .map(OperationLogEntry::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GitError::new(ErrorKind::SystemError, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_task_round_trips() {
        let store = GitStore::open_in_memory().await.unwrap();
        let id = Uuid::new_v4();
        let created = store
            .create_task(CreateTask {
                id,
                operation: "clone".into(),
                workspace_path: None,
                params: serde_json::json!({"url": "https://example.com/repo.git"}),
                priority: 0,
            })
            .await
            .unwrap();
        assert_eq!(created.status, TaskStatus::Queued);

        let fetched = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(fetched.operation, "clone");
    }

    #[tokio::test]
    async fn update_task_applies_only_whitelisted_fields() {
        let store = GitStore::open_in_memory().await.unwrap();
        let id = Uuid::new_v4();
        store
            .create_task(CreateTask {
                id,
                operation: "status".into(),
                workspace_path: None,
                params: serde_json::json!({}),
                priority: 0,
            })
            .await
            .unwrap();

        let updated = store
            .update_task(
                id,
                TaskUpdate {
                    status: Some(TaskStatus::Running),
                    progress: Some(50),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Running);
        assert_eq!(updated.progress, 50);
        assert!(updated.error_message.is_none());
    }

    #[tokio::test]
    async fn get_pending_tasks_orders_by_priority_then_created_at_ascending() {
        let store = GitStore::open_in_memory().await.unwrap();

        // Two low-priority tasks with distinct, explicit created_at values
        // (SQLite's row timestamp resolution is a second; creating them back
        // to back wouldn't reliably distinguish ordering) and one
        // high-priority task created in between.
        let low_first = Uuid::new_v4();
        let high = Uuid::new_v4();
        let low_second = Uuid::new_v4();

        for (id, priority, created_at) in
            [(low_first, 0, 1_000i64), (high, 5, 1_001i64), (low_second, 0, 1_002i64)]
        {
            sqlx::query(
                "INSERT INTO tasks (id, operation, status, workspace_path, params, result, \
                 error_message, progress, priority, created_at, started_at, completed_at) \
                 VALUES (?, 'fetch', 'queued', NULL, '{}', NULL, NULL, 0, ?, ?, NULL, NULL)",
            )
            .bind(id.to_string())
            .bind(priority as i64)
            .bind(created_at)
            .execute(&store.pool)
            .await
            .unwrap();
        }

        let pending = store.get_pending_tasks(10).await.unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending.iter().all(|t| t.status == TaskStatus::Queued));

        let ids: Vec<Uuid> = pending.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![high, low_first, low_second], "expected priority DESC, then created_at ASC");
    }

    #[tokio::test]
    async fn delete_task_cascades_operation_logs() {
        let store = GitStore::open_in_memory().await.unwrap();
        let id = Uuid::new_v4();
        store
            .create_task(CreateTask {
                id,
                operation: "commit".into(),
                workspace_path: None,
                params: serde_json::json!({}),
                priority: 0,
            })
            .await
            .unwrap();
        store
            .log_operation(id, "commit", LogLevel::Info, "started")
            .await
            .unwrap();

        assert!(store.delete_task(id).await.unwrap());
        let logs = store.get_operation_logs(id, 10).await.unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn workspace_total_size_sums_across_workspaces() {
        let store = GitStore::open_in_memory().await.unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store
            .create_workspace(CreateWorkspace { id: a, path: "/tmp/a".into() })
            .await
            .unwrap();
        store
            .create_workspace(CreateWorkspace { id: b, path: "/tmp/b".into() })
            .await
            .unwrap();
        store.update_workspace_size(a, 100).await.unwrap();
        store.update_workspace_size(b, 250).await.unwrap();

        assert_eq!(store.get_workspace_total_size().await.unwrap(), 350);
    }
}
