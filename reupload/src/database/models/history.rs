//! Publish history database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::{AttemptOutcome, Engagement, FailureCode};
use crate::history::HistoryRecord;
use crate::{Error, Result};

/// One row of `publish_history`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct HistoryDbModel {
    pub id: String,
    pub task_id: String,
    pub destination_id: String,
    pub video_name: String,
    pub success: bool,
    pub remote_id: Option<String>,
    pub url: Option<String>,
    /// FailureCode in SCREAMING_SNAKE_CASE, NULL for successes
    pub failure_code: Option<String>,
    pub message: Option<String>,
    pub views: i64,
    pub likes: i64,
    pub shares: i64,
    pub comments: i64,
    pub retries_used: i64,
    /// Unix epoch milliseconds
    pub recorded_at: i64,
}

fn counter(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn uncounter(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl From<&HistoryRecord> for HistoryDbModel {
    fn from(record: &HistoryRecord) -> Self {
        let mut row = Self {
            id: record.id.clone(),
            task_id: record.task_id.clone(),
            destination_id: record.destination_id.clone(),
            video_name: record.video_name.clone(),
            success: false,
            remote_id: None,
            url: None,
            failure_code: None,
            message: None,
            views: 0,
            likes: 0,
            shares: 0,
            comments: 0,
            retries_used: i64::from(record.retries_used),
            recorded_at: datetime_to_ms(record.recorded_at),
        };

        match &record.outcome {
            AttemptOutcome::Success {
                remote_id,
                url,
                engagement,
            } => {
                row.success = true;
                row.remote_id = Some(remote_id.clone());
                row.url = Some(url.clone());
                row.views = counter(engagement.views);
                row.likes = counter(engagement.likes);
                row.shares = counter(engagement.shares);
                row.comments = counter(engagement.comments);
            }
            AttemptOutcome::Failure { code, message } => {
                row.failure_code = Some(code.to_string());
                row.message = Some(message.clone());
            }
        }
        row
    }
}

impl TryFrom<HistoryDbModel> for HistoryRecord {
    type Error = Error;

    fn try_from(row: HistoryDbModel) -> Result<Self> {
        let outcome = if row.success {
            AttemptOutcome::Success {
                remote_id: row.remote_id.unwrap_or_default(),
                url: row.url.unwrap_or_default(),
                engagement: Engagement {
                    views: uncounter(row.views),
                    likes: uncounter(row.likes),
                    shares: uncounter(row.shares),
                    comments: uncounter(row.comments),
                },
            }
        } else {
            let raw = row.failure_code.unwrap_or_default();
            let code = raw.parse::<FailureCode>().map_err(|_| {
                Error::Other(format!("unknown failure code '{raw}' in history row {}", row.id))
            })?;
            AttemptOutcome::Failure {
                code,
                message: row.message.unwrap_or_default(),
            }
        };

        Ok(Self {
            id: row.id,
            task_id: row.task_id,
            destination_id: row.destination_id,
            video_name: row.video_name,
            outcome,
            retries_used: u32::try_from(row.retries_used).unwrap_or(0),
            recorded_at: ms_to_datetime(row.recorded_at),
        })
    }
}
