//! Publish history.
//!
//! Every resolved publish attempt lands here. The rate limiter derives its
//! windows from this log and the statistics are computed over it.

mod memory;
mod purge;
mod stats;
mod store;

pub use memory::InMemoryHistoryStore;
pub use purge::{HistoryPurgeConfig, HistoryPurgeService};
pub use stats::{DestinationStats, UploadStats};
pub use store::SqlxHistoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::Result;
use crate::domain::{AttemptOutcome, Engagement, FailureCode, PublishAttempt};

/// Persisted form of a resolved publish attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Same id as the attempt it records.
    pub id: String,
    pub task_id: String,
    pub destination_id: String,
    pub video_name: String,
    pub outcome: AttemptOutcome,
    pub retries_used: u32,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_attempt(attempt: &PublishAttempt, video_name: impl Into<String>) -> Self {
        Self {
            id: attempt.id.clone(),
            task_id: attempt.task_id.clone(),
            destination_id: attempt.destination_id.clone(),
            video_name: video_name.into(),
            outcome: attempt.outcome.clone(),
            retries_used: attempt.retries_used,
            recorded_at: attempt.recorded_at,
        }
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

/// Query over the history log. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub destination: Option<String>,
    /// Inclusive lower bound on `recorded_at`.
    pub since: Option<DateTime<Utc>>,
    pub success_only: bool,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn successes(mut self) -> Self {
        self.success_only = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Predicate form used by the in-memory store.
    pub fn matches(&self, record: &HistoryRecord) -> bool {
        if let Some(dest) = &self.destination
            && !record.destination_id.eq_ignore_ascii_case(dest)
        {
            return false;
        }
        if let Some(since) = self.since
            && record.recorded_at < since
        {
            return false;
        }
        !self.success_only || record.is_success()
    }
}

/// Append-only publish log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist one resolved attempt.
    async fn append(&self, record: &HistoryRecord) -> Result<()>;

    /// Records matching the filter, newest first.
    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>>;

    /// Remove every record, returning how many were deleted.
    async fn clear(&self) -> Result<u64>;

    /// Remove records older than `cutoff`, returning how many were deleted.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Read side over a history store: listings and statistics.
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn HistoryStore>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    pub async fn list(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>> {
        self.store.list(filter).await
    }

    /// Aggregates over the whole log.
    pub async fn stats(&self) -> Result<UploadStats> {
        self.stats_for(&HistoryFilter::new()).await
    }

    /// Aggregates over the records matching `filter`.
    pub async fn stats_for(&self, filter: &HistoryFilter) -> Result<UploadStats> {
        let records = self.store.list(filter).await?;
        Ok(UploadStats::from_records(&records))
    }

    pub async fn clear(&self) -> Result<u64> {
        let removed = self.store.clear().await?;
        tracing::info!(removed, "Publish history cleared");
        Ok(removed)
    }
}
