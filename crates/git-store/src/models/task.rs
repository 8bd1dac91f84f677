use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub operation: String,
    pub status: TaskStatus,
    pub workspace_path: Option<String>,
    pub params: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub progress: i32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Raw row shape as stored: timestamps as epoch seconds, JSON columns as
/// text, `status`/`operation` as their string form.
#[derive(Debug, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub operation: String,
    pub status: String,
    pub workspace_path: Option<String>,
    pub params: String,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub progress: i64,
    pub priority: i64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: Uuid::parse_str(&row.id)?,
            operation: row.operation,
            status: row.status.parse()?,
            workspace_path: row.workspace_path,
            params: serde_json::from_str(&row.params).unwrap_or(serde_json::Value::Null),
            result: row.result.and_then(|r| serde_json::from_str(&r).ok()),
            error_message: row.error_message,
            progress: row.progress as i32,
            priority: row.priority as i32,
            created_at: epoch_to_utc(row.created_at),
            started_at: row.started_at.map(epoch_to_utc),
            completed_at: row.completed_at.map(epoch_to_utc),
        })
    }
}

pub fn epoch_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone)]
pub struct CreateTask {
    pub id: Uuid,
    pub operation: String,
    pub workspace_path: Option<String>,
    pub params: serde_json::Value,
    pub priority: i32,
}

/// Whitelisted set of mutable fields; `update_task` accepts only these, so
/// a typo'd column name is a compile error rather than a silently-dropped
/// statement fragment.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<i32>,
    pub result: Option<Option<serde_json::Value>>,
    pub error_message: Option<Option<String>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
