use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::task::epoch_to_utc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub path: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, FromRow)]
pub struct WorkspaceRow {
    pub id: String,
    pub path: String,
    pub size_bytes: i64,
    pub last_accessed_at: i64,
    pub created_at: i64,
    pub metadata: String,
}

impl TryFrom<WorkspaceRow> for Workspace {
    type Error = anyhow::Error;

    fn try_from(row: WorkspaceRow) -> Result<Self, Self::Error> {
        Ok(Workspace {
            id: Uuid::parse_str(&row.id)?,
            path: row.path,
            size_bytes: row.size_bytes,
            created_at: epoch_to_utc(row.created_at),
            last_accessed_at: epoch_to_utc(row.last_accessed_at),
            metadata: serde_json::from_str(&row.metadata).unwrap_or(serde_json::Value::Null),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateWorkspace {
    pub id: Uuid,
    pub path: String,
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
