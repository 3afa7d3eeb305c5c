//! Per-destination publish quotas.
//!
//! Windows are calendar buckets in the process-local timezone: the current
//! day and the current clock hour. Counts are recomputed from the history
//! log on every query, nothing is cached between calls.
//!
//! [`RateLimiter::acquire`] is the admission path used by the orchestrator.
//! It reserves an in-flight slot under a per-destination lock, so two tasks
//! racing for the last slot of a window cannot both be admitted. The slot is
//! released when the returned [`AdmissionPermit`] is dropped, which happens
//! after the attempt has been appended to history.

use chrono::{DateTime, Duration, Local, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{DestinationCatalog, RateLimitPolicy};
use crate::history::{HistoryFilter, HistoryStore};
use crate::{Error, Result};

/// Window usage for one destination at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindowCounter {
    pub destination_id: String,
    /// Successes recorded on the current local calendar day.
    pub daily_used: u32,
    /// Successes recorded in the current local clock hour.
    pub hourly_used: u32,
    /// Admissions granted but not yet released.
    pub in_flight: u32,
    pub policy: Option<RateLimitPolicy>,
}

impl RateWindowCounter {
    /// Whether one more attempt fits in both windows.
    pub fn has_capacity(&self) -> bool {
        match self.policy {
            None => true,
            Some(policy) => {
                self.daily_used + self.in_flight < policy.daily
                    && self.hourly_used + self.in_flight < policy.hourly
            }
        }
    }

    /// Slots left today, `None` when unlimited.
    pub fn daily_remaining(&self) -> Option<u32> {
        self.policy
            .map(|p| p.daily.saturating_sub(self.daily_used + self.in_flight))
    }

    /// Slots left this hour, `None` when unlimited.
    pub fn hourly_remaining(&self) -> Option<u32> {
        self.policy
            .map(|p| p.hourly.saturating_sub(self.hourly_used + self.in_flight))
    }
}

/// Reservation of one slot in a destination's windows.
///
/// Dropping the permit releases the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    destination_id: String,
    in_flight: Arc<DashMap<String, u32>>,
}

impl AdmissionPermit {
    pub fn destination_id(&self) -> &str {
        &self.destination_id
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(mut count) = self.in_flight.get_mut(&self.destination_id) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Start of the local calendar day containing `now`, in UTC.
fn local_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_timezone(&Local)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        // Midnight skipped by a DST change: a 26 hour lookback covers the day.
        .unwrap_or_else(|| now - Duration::hours(26))
}

/// Decides whether a destination may receive another publish.
pub struct RateLimiter {
    catalog: Arc<DestinationCatalog>,
    history: Arc<dyn HistoryStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    in_flight: Arc<DashMap<String, u32>>,
}

impl RateLimiter {
    pub fn new(catalog: Arc<DestinationCatalog>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            catalog,
            history,
            locks: DashMap::new(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    fn policy(&self, destination_id: &str) -> Result<(String, Option<RateLimitPolicy>)> {
        self.catalog
            .get(destination_id)
            .map(|d| (d.id.clone(), d.rate_limit))
            .ok_or_else(|| Error::UnknownDestination(destination_id.to_string()))
    }

    fn lock_for(&self, destination_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(destination_id.to_string())
            .or_default()
            .clone()
    }

    /// Current window usage of a destination.
    pub async fn window(&self, destination_id: &str, now: DateTime<Utc>) -> Result<RateWindowCounter> {
        let (id, policy) = self.policy(destination_id)?;
        let in_flight = self.in_flight(&id);

        let successes = self
            .history
            .list(
                &HistoryFilter::new()
                    .destination(id.as_str())
                    .since(local_day_start(now))
                    .successes(),
            )
            .await?;

        let local_now = now.with_timezone(&Local);
        let today = local_now.date_naive();
        let hour = local_now.hour();

        let mut daily_used = 0;
        let mut hourly_used = 0;
        for record in &successes {
            let at = record.recorded_at.with_timezone(&Local);
            if at.date_naive() != today {
                continue;
            }
            daily_used += 1;
            if at.hour() == hour {
                hourly_used += 1;
            }
        }

        Ok(RateWindowCounter {
            destination_id: id,
            daily_used,
            hourly_used,
            in_flight,
            policy,
        })
    }

    /// Whether one more publish to `destination_id` fits at `now`.
    ///
    /// Read-only; admissions in flight count as used.
    pub async fn admit(&self, destination_id: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.window(destination_id, now).await?.has_capacity())
    }

    /// Check and reserve in one step. `None` means the destination is at its limit.
    pub async fn acquire(
        &self,
        destination_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AdmissionPermit>> {
        let (id, _) = self.policy(destination_id)?;
        let lock = self.lock_for(&id);
        let _guard = lock.lock().await;

        let window = self.window(&id, now).await?;
        if !window.has_capacity() {
            debug!(
                destination = %id,
                daily_used = window.daily_used,
                hourly_used = window.hourly_used,
                in_flight = window.in_flight,
                "Rate window full"
            );
            return Ok(None);
        }

        *self.in_flight.entry(id.clone()).or_insert(0) += 1;
        Ok(Some(AdmissionPermit {
            destination_id: id,
            in_flight: Arc::clone(&self.in_flight),
        }))
    }

    /// Admissions currently held for a destination.
    pub fn in_flight(&self, destination_id: &str) -> u32 {
        self.in_flight.get(destination_id).map(|c| *c).unwrap_or(0)
    }

    /// Windows for every configured destination.
    pub async fn windows(&self, now: DateTime<Utc>) -> Result<Vec<RateWindowCounter>> {
        let mut windows = Vec::with_capacity(self.catalog.len());
        for destination in self.catalog.iter() {
            windows.push(self.window(&destination.id, now).await?);
        }
        Ok(windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DestinationConfig, Engagement, FailureCode, PublishAttempt};
    use crate::history::{HistoryRecord, InMemoryHistoryStore};
    use chrono::TimeZone;

    fn local(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2026, 6, day, hour, minute, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn limiter(
        destinations: Vec<DestinationConfig>,
    ) -> (RateLimiter, Arc<InMemoryHistoryStore>) {
        let store = Arc::new(InMemoryHistoryStore::new());
        let catalog = Arc::new(DestinationCatalog::new(destinations).unwrap());
        (RateLimiter::new(catalog, store.clone()), store)
    }

    async fn record(store: &InMemoryHistoryStore, dest: &str, at: DateTime<Utc>, success: bool) {
        let attempt = if success {
            PublishAttempt::success("t", dest, "r", "u", Engagement::default(), 0)
        } else {
            PublishAttempt::failure("t", dest, FailureCode::RemoteRejected, "no", 0)
        };
        store
            .append(&HistoryRecord::from_attempt(&attempt.at(at), "v.mp4"))
            .await
            .unwrap();
    }

    fn capped(daily: u32, hourly: u32) -> DestinationConfig {
        DestinationConfig::new("capped", "Capped").with_rate_limit(daily, hourly)
    }

    #[tokio::test]
    async fn test_daily_limit_applies_across_hours() {
        let (limiter, store) = limiter(vec![capped(2, 5)]);
        record(&store, "capped", local(15, 9, 0), true).await;
        assert!(limiter.admit("capped", local(15, 17, 0)).await.unwrap());

        record(&store, "capped", local(15, 13, 0), true).await;
        assert!(!limiter.admit("capped", local(15, 17, 0)).await.unwrap());
        assert!(!limiter.admit("capped", local(15, 22, 30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_hourly_limit_resets_on_the_hour() {
        let (limiter, store) = limiter(vec![capped(10, 1)]);
        record(&store, "capped", local(15, 13, 10), true).await;

        assert!(!limiter.admit("capped", local(15, 13, 50)).await.unwrap());
        assert!(limiter.admit("capped", local(15, 14, 5)).await.unwrap());

        let window = limiter.window("capped", local(15, 14, 5)).await.unwrap();
        assert_eq!(window.daily_used, 1);
        assert_eq!(window.hourly_used, 0);
        assert_eq!(window.daily_remaining(), Some(9));
    }

    #[tokio::test]
    async fn test_failures_and_other_days_do_not_count() {
        let (limiter, store) = limiter(vec![capped(1, 1)]);
        record(&store, "capped", local(14, 12, 0), true).await;
        record(&store, "capped", local(15, 12, 0), false).await;

        let window = limiter.window("capped", local(15, 12, 30)).await.unwrap();
        assert_eq!(window.daily_used, 0);
        assert!(window.has_capacity());
    }

    #[tokio::test]
    async fn test_unlimited_destination_always_admitted() {
        let (limiter, store) = limiter(vec![DestinationConfig::new("open", "Open")]);
        for minute in 0..20 {
            record(&store, "open", local(15, 10, minute), true).await;
        }
        assert!(limiter.admit("open", local(15, 10, 30)).await.unwrap());
        assert_eq!(
            limiter.window("open", local(15, 10, 30)).await.unwrap().daily_remaining(),
            None
        );
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let (limiter, _) = limiter(vec![capped(1, 1)]);
        assert!(matches!(
            limiter.admit("nowhere", Utc::now()).await,
            Err(Error::UnknownDestination(_))
        ));
    }

    #[tokio::test]
    async fn test_in_flight_permits_hold_the_last_slot() {
        let (limiter, store) = limiter(vec![capped(2, 2)]);
        let now = local(15, 11, 0);
        record(&store, "capped", local(15, 10, 0), true).await;

        let permit = limiter.acquire("capped", now).await.unwrap();
        assert!(permit.is_some());
        assert_eq!(limiter.in_flight("capped"), 1);
        assert!(limiter.acquire("capped", now).await.unwrap().is_none());
        assert!(!limiter.admit("capped", now).await.unwrap());

        drop(permit);
        assert_eq!(limiter.in_flight("capped"), 0);
        assert!(limiter.acquire("capped", now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_over_admits() {
        let (limiter, _) = limiter(vec![capped(3, 3)]);
        let limiter = Arc::new(limiter);
        let now = local(15, 8, 0);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire("capped", now).await.unwrap()
            }));
        }

        let mut permits = Vec::new();
        for handle in handles {
            if let Some(permit) = handle.await.unwrap() {
                permits.push(permit);
            }
        }
        assert_eq!(permits.len(), 3);
    }
}
