use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use super::task::epoch_to_utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub id: i64,
    pub task_id: Uuid,
    pub operation: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct OperationLogRow {
    pub id: i64,
    pub task_id: String,
    pub operation: String,
    pub level: String,
    pub message: String,
    pub timestamp: i64,
}

impl TryFrom<OperationLogRow> for OperationLogEntry {
    type Error = anyhow::Error;

    fn try_from(row: OperationLogRow) -> Result<Self, Self::Error> {
        Ok(OperationLogEntry {
            id: row.id,
            task_id: Uuid::parse_str(&row.task_id)?,
            operation: row.operation,
            level: row.level.parse()?,
            message: row.message,
            timestamp: epoch_to_utc(row.timestamp),
        })
    }
}
