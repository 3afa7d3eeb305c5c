//! SQLite-backed history store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{HistoryFilter, HistoryRecord, HistoryStore};
use crate::Result;
use crate::database::models::HistoryDbModel;
use crate::database::time::datetime_to_ms;

/// History store over the `publish_history` table.
pub struct SqlxHistoryStore {
    pool: SqlitePool,
}

impl SqlxHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for SqlxHistoryStore {
    async fn append(&self, record: &HistoryRecord) -> Result<()> {
        let row = HistoryDbModel::from(record);
        sqlx::query(
            r#"
            INSERT INTO publish_history (
                id, task_id, destination_id, video_name, success, remote_id, url,
                failure_code, message, views, likes, shares, comments, retries_used, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.task_id)
        .bind(&row.destination_id)
        .bind(&row.video_name)
        .bind(row.success)
        .bind(&row.remote_id)
        .bind(&row.url)
        .bind(&row.failure_code)
        .bind(&row.message)
        .bind(row.views)
        .bind(row.likes)
        .bind(row.shares)
        .bind(row.comments)
        .bind(row.retries_used)
        .bind(row.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let rows = sqlx::query_as::<_, HistoryDbModel>(
            r#"
            SELECT * FROM publish_history
            WHERE (? IS NULL OR destination_id = ? COLLATE NOCASE)
              AND (? IS NULL OR recorded_at >= ?)
              AND (? = 0 OR success = 1)
            ORDER BY recorded_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(filter.destination.as_deref())
        .bind(filter.destination.as_deref())
        .bind(filter.since.map(datetime_to_ms))
        .bind(filter.since.map(datetime_to_ms))
        .bind(filter.success_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryRecord::try_from).collect()
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM publish_history")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM publish_history WHERE recorded_at < ?")
            .bind(datetime_to_ms(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect;
    use crate::database::time::{ms_to_datetime, now_ms};
    use crate::domain::{Engagement, FailureCode, PublishAttempt};
    use chrono::Duration;

    fn record(attempt: PublishAttempt) -> HistoryRecord {
        HistoryRecord::from_attempt(&attempt, "clip.mp4")
    }

    #[tokio::test]
    async fn test_append_and_filter() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let store = SqlxHistoryStore::new(pool.clone());
        // Rows keep millisecond precision.
        let now = ms_to_datetime(now_ms());

        let engagement = Engagement {
            views: 12,
            likes: 3,
            shares: 1,
            comments: 0,
        };
        let ok = record(PublishAttempt::success("t1", "tiktok", "tt_1", "https://t/1", engagement, 1).at(now));
        let failed = record(
            PublishAttempt::failure("t1", "youtube", FailureCode::RateLimited, "window full", 3)
                .at(now - Duration::minutes(5)),
        );
        let old = record(
            PublishAttempt::success("t0", "tiktok", "tt_0", "https://t/0", Engagement::default(), 0)
                .at(now - Duration::days(3)),
        );
        for r in [&ok, &failed, &old] {
            store.append(r).await.unwrap();
        }

        let all = store.list(&HistoryFilter::new()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], ok);
        assert_eq!(all[1], failed);

        let tiktok_today = store
            .list(
                &HistoryFilter::new()
                    .destination("TIKTOK")
                    .since(now - Duration::days(1))
                    .successes(),
            )
            .await
            .unwrap();
        assert_eq!(tiktok_today, vec![ok.clone()]);

        let limited = store.list(&HistoryFilter::new().limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);

        let reopened = SqlxHistoryStore::new(pool);
        assert_eq!(reopened.list(&HistoryFilter::new()).await.unwrap(), all);
    }

    #[tokio::test]
    async fn test_clear_and_purge() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let store = SqlxHistoryStore::new(pool);
        let now = Utc::now();

        for days in [0, 5, 50] {
            let attempt = PublishAttempt::failure("t", "instagram", FailureCode::NetworkError, "x", 0)
                .at(now - Duration::days(days));
            store.append(&record(attempt)).await.unwrap();
        }

        assert_eq!(store.purge_before(now - Duration::days(30)).await.unwrap(), 1);
        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.list(&HistoryFilter::new()).await.unwrap().is_empty());
    }
}
