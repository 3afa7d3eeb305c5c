//! In-memory history store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{HistoryFilter, HistoryRecord, HistoryStore};
use crate::Result;

/// Volatile history log, used by tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<Vec<HistoryRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, record: &HistoryRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>> {
        let mut records: Vec<HistoryRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps, newest insert first.
        records.reverse();
        records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn clear(&self) -> Result<u64> {
        let mut records = self.records.write();
        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.recorded_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Engagement, PublishAttempt};
    use chrono::Duration;

    fn success(dest: &str, at: DateTime<Utc>) -> HistoryRecord {
        let attempt = PublishAttempt::success("t", dest, "r", "u", Engagement::default(), 0).at(at);
        HistoryRecord::from_attempt(&attempt, "v.mp4")
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let store = InMemoryHistoryStore::new();
        let now = Utc::now();
        for offset in [3, 1, 2] {
            store
                .append(&success("tiktok", now - Duration::minutes(offset)))
                .await
                .unwrap();
        }

        let listed = store.list(&HistoryFilter::new().limit(2)).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].recorded_at, now - Duration::minutes(1));
        assert_eq!(listed[1].recorded_at, now - Duration::minutes(2));
    }

    #[tokio::test]
    async fn test_purge_before() {
        let store = InMemoryHistoryStore::new();
        let now = Utc::now();
        store.append(&success("tiktok", now - Duration::days(40))).await.unwrap();
        store.append(&success("tiktok", now)).await.unwrap();

        assert_eq!(store.purge_before(now - Duration::days(30)).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
