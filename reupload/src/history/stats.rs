//! Upload statistics over the history log.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::HistoryRecord;

/// Per-destination slice of [`UploadStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationStats {
    pub total_uploads: u64,
    pub successful_uploads: u64,
    pub failed_uploads: u64,
    pub total_views: u64,
}

/// Aggregated counters over a set of history records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStats {
    pub total_uploads: u64,
    pub successful_uploads: u64,
    pub failed_uploads: u64,
    /// Successful over total, in percent. Zero when there are no uploads.
    pub success_rate: f64,
    pub total_views: u64,
    pub total_likes: u64,
    pub total_shares: u64,
    pub total_comments: u64,
    /// Views per successful upload. Zero when nothing succeeded.
    pub average_views: f64,
    pub by_destination: BTreeMap<String, DestinationStats>,
}

impl UploadStats {
    pub fn from_records(records: &[HistoryRecord]) -> Self {
        let mut stats = Self::default();

        for record in records {
            let entry = stats
                .by_destination
                .entry(record.destination_id.clone())
                .or_default();
            stats.total_uploads += 1;
            entry.total_uploads += 1;

            if record.is_success() {
                let engagement = record.engagement();
                stats.successful_uploads += 1;
                stats.total_views += engagement.views;
                stats.total_likes += engagement.likes;
                stats.total_shares += engagement.shares;
                stats.total_comments += engagement.comments;
                entry.successful_uploads += 1;
                entry.total_views += engagement.views;
            } else {
                stats.failed_uploads += 1;
                entry.failed_uploads += 1;
            }
        }

        if stats.total_uploads > 0 {
            stats.success_rate =
                stats.successful_uploads as f64 * 100.0 / stats.total_uploads as f64;
        }
        if stats.successful_uploads > 0 {
            stats.average_views = stats.total_views as f64 / stats.successful_uploads as f64;
        }
        stats
    }
}
