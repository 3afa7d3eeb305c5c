//! Reupload task and publish attempt entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::value_objects::{PublishMetadata, ReuploadSettings};
use crate::{Error, Result};

/// Lifecycle of a reupload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, waiting for a worker slot.
    #[default]
    Pending,
    /// Media step or destinations in progress.
    Running,
    /// Every destination published successfully.
    Completed,
    /// At least one destination ended in failure.
    Failed,
    /// Stopped by request before all destinations resolved.
    Cancelled,
}

impl TaskStatus {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Tasks only move forward.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Pending, Cancelled) | (Running, Completed | Failed | Cancelled)
        )
    }

    pub fn transition_to(&self, target: TaskStatus) -> Result<TaskStatus> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::invalid_transition(self, target))
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one destination within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    #[default]
    Pending,
    Running,
    Success,
    Failure,
}

impl AttemptState {
    /// `Failure -> Pending` is the retry edge.
    pub fn can_transition_to(&self, target: AttemptState) -> bool {
        use AttemptState::*;

        matches!(
            (self, target),
            (Pending, Running) | (Running, Success | Failure) | (Failure, Pending)
        )
    }

    pub fn transition_to(&self, target: AttemptState) -> Result<AttemptState> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::invalid_transition(
                format!("{self:?}"),
                format!("{target:?}"),
            ))
        }
    }
}

/// Reason code of a failed attempt.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    NoDestinations,
    SizeExceeded,
    UnsupportedFormat,
    MissingMetadata,
    TransformFailed,
    RateLimited,
    RemoteRejected,
    NetworkError,
    Cancelled,
}

impl FailureCode {
    /// Retrying can change the result.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransformFailed | Self::RateLimited | Self::RemoteRejected | Self::NetworkError
        )
    }

    /// Deterministic input problems.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NoDestinations | Self::SizeExceeded | Self::UnsupportedFormat | Self::MissingMetadata
        )
    }
}

/// Engagement counters reported by the destination at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub shares: u64,
    #[serde(default)]
    pub comments: u64,
}

/// Final result of an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success {
        remote_id: String,
        url: String,
        #[serde(default)]
        engagement: Engagement,
    },
    Failure {
        code: FailureCode,
        message: String,
    },
}

/// One destination's resolved publish try, including its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishAttempt {
    pub id: String,
    pub task_id: String,
    pub destination_id: String,
    pub outcome: AttemptOutcome,
    pub retries_used: u32,
    pub recorded_at: DateTime<Utc>,
}

impl PublishAttempt {
    pub fn success(
        task_id: impl Into<String>,
        destination_id: impl Into<String>,
        remote_id: impl Into<String>,
        url: impl Into<String>,
        engagement: Engagement,
        retries_used: u32,
    ) -> Self {
        Self::with_outcome(
            task_id,
            destination_id,
            AttemptOutcome::Success {
                remote_id: remote_id.into(),
                url: url.into(),
                engagement,
            },
            retries_used,
        )
    }

    pub fn failure(
        task_id: impl Into<String>,
        destination_id: impl Into<String>,
        code: FailureCode,
        message: impl Into<String>,
        retries_used: u32,
    ) -> Self {
        Self::with_outcome(
            task_id,
            destination_id,
            AttemptOutcome::Failure {
                code,
                message: message.into(),
            },
            retries_used,
        )
    }

    fn with_outcome(
        task_id: impl Into<String>,
        destination_id: impl Into<String>,
        outcome: AttemptOutcome,
        retries_used: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            destination_id: destination_id.into(),
            outcome,
            retries_used,
            recorded_at: Utc::now(),
        }
    }

    /// Override the timestamp (history imports and tests).
    pub fn at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = recorded_at;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }

    pub fn failure_code(&self) -> Option<FailureCode> {
        match &self.outcome {
            AttemptOutcome::Failure { code, .. } => Some(*code),
            AttemptOutcome::Success { .. } => None,
        }
    }

    pub fn engagement(&self) -> Engagement {
        match &self.outcome {
            AttemptOutcome::Success { engagement, .. } => *engagement,
            AttemptOutcome::Failure { .. } => Engagement::default(),
        }
    }
}

/// One video published to an ordered set of destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReuploadTask {
    pub id: String,
    pub video_id: String,
    pub video_name: String,
    /// Publishing order.
    pub destinations: Vec<String>,
    pub settings: ReuploadSettings,
    pub metadata: PublishMetadata,
    pub status: TaskStatus,
    /// Resolved destinations over total destinations, 0-100.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Task-level error summary.
    pub error: Option<String>,
    pub attempts: Vec<PublishAttempt>,
}

impl ReuploadTask {
    pub fn new(
        video_id: impl Into<String>,
        video_name: impl Into<String>,
        destinations: Vec<String>,
        settings: ReuploadSettings,
        metadata: PublishMetadata,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            video_id: video_id.into(),
            video_name: video_name.into(),
            destinations,
            settings,
            metadata,
            status: TaskStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            attempts: Vec::new(),
        }
    }

    fn transition(&mut self, target: TaskStatus) -> Result<()> {
        self.status = self.status.transition_to(target)?;
        Ok(())
    }

    /// `Pending -> Running`.
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Append a resolved attempt and refresh progress.
    pub fn record_attempt(&mut self, attempt: PublishAttempt) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(Error::validation(format!(
                "cannot record an attempt on a {} task",
                self.status
            )));
        }
        if self.attempts.len() >= self.destinations.len() {
            return Err(Error::validation(format!(
                "task {} already has an attempt for each of its {} destinations",
                self.id,
                self.destinations.len()
            )));
        }
        self.attempts.push(attempt);
        self.progress = (self.attempts.len() * 100 / self.destinations.len()) as u8;
        Ok(())
    }

    /// Settle the terminal status. Progress is fixed at 100.
    pub fn finish(&mut self, cancelled: bool) -> Result<TaskStatus> {
        let target = if self.all_succeeded() {
            TaskStatus::Completed
        } else if cancelled && self.unresolved_count() > 0 {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        self.transition(target)?;
        if target == TaskStatus::Cancelled && self.error.is_none() {
            self.error = Some(format!(
                "cancelled with {} destination(s) unresolved",
                self.unresolved_count()
            ));
        }
        self.finished_at = Some(Utc::now());
        self.progress = 100;
        Ok(target)
    }

    /// Cancel a task that never started.
    pub fn cancel_pending(&mut self) -> Result<()> {
        self.transition(TaskStatus::Cancelled)?;
        self.error = Some("cancelled before start".to_string());
        self.finished_at = Some(Utc::now());
        self.progress = 100;
        Ok(())
    }

    pub fn all_succeeded(&self) -> bool {
        self.attempts.len() == self.destinations.len() && self.attempts.iter().all(|a| a.is_success())
    }

    pub fn unresolved_count(&self) -> usize {
        self.destinations.len().saturating_sub(self.attempts.len())
    }

    pub fn successful_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| a.is_success()).count()
    }

    pub fn failed_attempts(&self) -> usize {
        self.attempts.len() - self.successful_attempts()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
