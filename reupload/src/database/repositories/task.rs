//! Reupload task repository.
//!
//! Every unfinished row carries the id of the process that wrote it and a
//! lease. The owner renews the lease while it runs the task; recovery only
//! touches rows whose lease ran out, so several processes can share one
//! database without failing each other's live tasks.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::warn;

use crate::database::models::TaskDbModel;
use crate::database::time::now_ms;
use crate::domain::{ReuploadTask, TaskStatus};
use crate::{Error, Result};

/// Default lease on unfinished task rows.
pub const DEFAULT_TASK_LEASE: Duration = Duration::from_secs(60);

/// Task snapshot repository trait.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert or overwrite the snapshot of a task.
    ///
    /// A row that already reached a terminal status is never overwritten;
    /// that case returns an invalid-transition error.
    async fn save_task(&self, task: &ReuploadTask) -> Result<()>;
    async fn get_task(&self, id: &str) -> Result<ReuploadTask>;
    /// Newest first, optionally restricted to one status.
    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<ReuploadTask>>;
    async fn delete_task(&self, id: &str) -> Result<()>;
    /// Extend the lease of every unfinished task this instance owns.
    async fn renew_leases(&self) -> Result<u64>;
    /// Fail unfinished tasks whose owner stopped renewing their lease.
    async fn fail_interrupted(&self) -> Result<u64>;
    /// How long a lease lasts without renewal.
    fn lease_duration(&self) -> Duration;
}

/// SQLx implementation of TaskRepository.
pub struct SqlxTaskRepository {
    pool: SqlitePool,
    owner_id: String,
    lease: Duration,
}

impl SqlxTaskRepository {
    /// Repository owned by a fresh instance id.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            owner_id: uuid::Uuid::new_v4().to_string(),
            lease: DEFAULT_TASK_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn lease_expiry(&self) -> i64 {
        now_ms().saturating_add(self.lease.as_millis().min(i64::MAX as u128) as i64)
    }

    async fn stored_status(&self, id: &str) -> Result<Option<String>> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM reupload_tasks WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(status.map(|(s,)| s))
    }
}

#[async_trait]
impl TaskRepository for SqlxTaskRepository {
    async fn save_task(&self, task: &ReuploadTask) -> Result<()> {
        let row = TaskDbModel::from_task(task)?;
        let lease_expires_at = (!task.is_terminal()).then(|| self.lease_expiry());

        let result = sqlx::query(
            r#"
            INSERT INTO reupload_tasks (
                id, video_id, video_name, destinations, settings, metadata,
                status, progress, error, attempts, created_at, started_at, finished_at,
                owner_id, lease_expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                error = excluded.error,
                attempts = excluded.attempts,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                owner_id = excluded.owner_id,
                lease_expires_at = excluded.lease_expires_at
            WHERE reupload_tasks.status NOT IN ('COMPLETED', 'FAILED', 'CANCELLED')
            "#,
        )
        .bind(&row.id)
        .bind(&row.video_id)
        .bind(&row.video_name)
        .bind(&row.destinations)
        .bind(&row.settings)
        .bind(&row.metadata)
        .bind(&row.status)
        .bind(row.progress)
        .bind(&row.error)
        .bind(&row.attempts)
        .bind(row.created_at)
        .bind(row.started_at)
        .bind(row.finished_at)
        .bind(&self.owner_id)
        .bind(lease_expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let stored = self
                .stored_status(&task.id)
                .await?
                .unwrap_or_else(|| "UNKNOWN".to_string());
            warn!(
                task_id = %task.id,
                stored = %stored,
                status = %task.status,
                "Refusing to overwrite finished task"
            );
            return Err(Error::invalid_transition(stored, task.status));
        }
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<ReuploadTask> {
        sqlx::query_as::<_, TaskDbModel>("SELECT * FROM reupload_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("ReuploadTask", id))?
            .into_task()
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<ReuploadTask>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, TaskDbModel>(
                    "SELECT * FROM reupload_tasks WHERE status = ? ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TaskDbModel>(
                    "SELECT * FROM reupload_tasks ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(TaskDbModel::into_task).collect()
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM reupload_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn renew_leases(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reupload_tasks SET lease_expires_at = ?
            WHERE owner_id = ? AND status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(self.lease_expiry())
        .bind(&self.owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn fail_interrupted(&self) -> Result<u64> {
        // Rows written before leases existed have neither column set.
        let now = now_ms();
        let result = sqlx::query(
            r#"
            UPDATE reupload_tasks SET
                status = 'FAILED',
                progress = 100,
                error = COALESCE(error, 'interrupted: owning process stopped'),
                finished_at = ?,
                lease_expires_at = NULL
            WHERE status IN ('PENDING', 'RUNNING')
              AND (owner_id IS NULL OR owner_id != ?)
              AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
            "#,
        )
        .bind(now)
        .bind(&self.owner_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    fn lease_duration(&self) -> Duration {
        self.lease
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect;
    use crate::domain::{PublishMetadata, ReuploadSettings};

    fn running_task() -> ReuploadTask {
        let mut task = ReuploadTask::new(
            "video-1",
            "clip.mp4",
            vec!["youtube".to_string()],
            ReuploadSettings::default(),
            PublishMetadata::new("Clip"),
        );
        task.start().unwrap();
        task
    }

    #[tokio::test]
    async fn test_finished_row_is_never_overwritten() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let repo = SqlxTaskRepository::new(pool);

        let mut task = running_task();
        repo.save_task(&task).await.unwrap();
        let stale = task.clone();
        task.finish(false).unwrap();
        repo.save_task(&task).await.unwrap();

        let err = repo.save_task(&stale).await.unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        let stored = repo.get_task(&task.id).await.unwrap();
        assert_eq!(stored.status, task.status);
        assert!(stored.is_terminal());
    }

    #[tokio::test]
    async fn test_live_lease_survives_other_instance_recovery() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let owner = SqlxTaskRepository::new(pool.clone());
        let other = SqlxTaskRepository::new(pool);
        assert_ne!(owner.owner_id(), other.owner_id());

        let task = running_task();
        owner.save_task(&task).await.unwrap();

        assert_eq!(other.fail_interrupted().await.unwrap(), 0);
        assert_eq!(other.get_task(&task.id).await.unwrap().status, TaskStatus::Running);
        // The owner itself never recovers its own rows.
        assert_eq!(owner.fail_interrupted().await.unwrap(), 0);
        assert_eq!(owner.renew_leases().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_recovered() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let crashed = SqlxTaskRepository::new(pool.clone()).with_lease(Duration::ZERO);
        let restarted = SqlxTaskRepository::new(pool);

        let task = running_task();
        crashed.save_task(&task).await.unwrap();

        assert_eq!(restarted.fail_interrupted().await.unwrap(), 1);
        let stored = restarted.get_task(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.finished_at.is_some());
        assert!(stored.error.unwrap().starts_with("interrupted"));

        // The old owner cannot resurrect it.
        assert!(crashed.save_task(&task).await.is_err());
        assert_eq!(crashed.renew_leases().await.unwrap(), 0);
    }
}
