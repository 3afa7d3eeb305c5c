//! Background retention for the publish history.
//!
//! Rate windows only look back one day, so old records only matter for
//! statistics. This service drops records older than the retention period.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::HistoryStore;
use crate::Result;

/// Retention settings for the publish history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPurgeConfig {
    /// Days of history to keep. 0 keeps everything.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Seconds between purge runs.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    90
}

fn default_check_interval_secs() -> u64 {
    3600
}

impl Default for HistoryPurgeConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl HistoryPurgeConfig {
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }
}

/// Periodically removes expired history records.
#[derive(Clone)]
pub struct HistoryPurgeService {
    config: HistoryPurgeConfig,
    store: Arc<dyn HistoryStore>,
}

impl HistoryPurgeService {
    pub fn new(config: HistoryPurgeConfig, store: Arc<dyn HistoryStore>) -> Self {
        Self { config, store }
    }

    /// One purge pass. Returns the number of records deleted.
    pub async fn run_purge(&self) -> Result<u64> {
        if self.config.retention_days == 0 {
            debug!("History purge disabled (retention_days = 0)");
            return Ok(0);
        }

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.config.retention_days));
        let deleted = self.store.purge_before(cutoff).await?;

        if deleted > 0 {
            info!(
                deleted,
                retention_days = self.config.retention_days,
                "Purged expired publish history"
            );
        } else {
            debug!("No publish history to purge");
        }
        Ok(deleted)
    }

    /// Run purges on an interval until `cancellation_token` fires.
    pub fn start_background_task(&self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let service = self.clone();

        tokio::spawn(async move {
            let period = Duration::from_secs(service.config.check_interval_secs.max(1));
            let mut ticker = interval(period);

            info!(
                retention_days = service.config.retention_days,
                interval_secs = period.as_secs(),
                "History purge service started"
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("History purge service shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = service.run_purge().await {
                            error!("History purge failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    pub fn config(&self) -> &HistoryPurgeConfig {
        &self.config
    }
}
