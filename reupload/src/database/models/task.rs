//! Reupload task database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime, opt_ms_to_datetime};
use crate::domain::{ReuploadTask, TaskStatus};
use crate::{Error, Result};

/// One row of `reupload_tasks`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskDbModel {
    pub id: String,
    pub video_id: String,
    pub video_name: String,
    /// JSON array of destination ids
    pub destinations: String,
    /// JSON ReuploadSettings snapshot
    pub settings: String,
    /// JSON PublishMetadata snapshot
    pub metadata: String,
    /// Status: PENDING, RUNNING, COMPLETED, FAILED, CANCELLED
    pub status: String,
    pub progress: i64,
    pub error: Option<String>,
    /// JSON array of PublishAttempt
    pub attempts: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl TaskDbModel {
    pub fn from_task(task: &ReuploadTask) -> Result<Self> {
        Ok(Self {
            id: task.id.clone(),
            video_id: task.video_id.clone(),
            video_name: task.video_name.clone(),
            destinations: serde_json::to_string(&task.destinations)?,
            settings: serde_json::to_string(&task.settings)?,
            metadata: serde_json::to_string(&task.metadata)?,
            status: task.status.as_str().to_string(),
            progress: i64::from(task.progress),
            error: task.error.clone(),
            attempts: serde_json::to_string(&task.attempts)?,
            created_at: datetime_to_ms(task.created_at),
            started_at: task.started_at.map(datetime_to_ms),
            finished_at: task.finished_at.map(datetime_to_ms),
        })
    }

    pub fn into_task(self) -> Result<ReuploadTask> {
        let status = TaskStatus::parse(&self.status).ok_or_else(|| {
            Error::Other(format!("unknown task status '{}' for task {}", self.status, self.id))
        })?;

        Ok(ReuploadTask {
            destinations: serde_json::from_str(&self.destinations)?,
            settings: serde_json::from_str(&self.settings)?,
            metadata: serde_json::from_str(&self.metadata)?,
            attempts: serde_json::from_str(&self.attempts)?,
            status,
            progress: self.progress.clamp(0, 100) as u8,
            error: self.error,
            created_at: ms_to_datetime(self.created_at),
            started_at: opt_ms_to_datetime(self.started_at),
            finished_at: opt_ms_to_datetime(self.finished_at),
            id: self.id,
            video_id: self.video_id,
            video_name: self.video_name,
        })
    }
}
