//! Deferred task submission.
//!
//! A scheduled reupload is validated when it is scheduled and handed to the
//! orchestrator once its instant arrives. Instants in the past fire right away.
//! Settled entries are kept for a retention period so callers can still see
//! how they ended, then pruned.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orchestrator::{ReuploadRequest, TaskOrchestrator};
use crate::{Error, Result};

/// Where a scheduled reupload stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScheduleState {
    /// Timer armed.
    Waiting,
    /// Timer went off; submission in progress. No longer cancellable.
    Firing,
    /// Handed to the orchestrator.
    Fired { task_id: String },
    Cancelled,
    /// Submission was rejected when the timer fired.
    Failed { error: String },
}

impl ScheduleState {
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Fired, cancelled or failed.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Waiting | Self::Firing)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Firing => "FIRING",
            Self::Fired { .. } => "FIRED",
            Self::Cancelled => "CANCELLED",
            Self::Failed { .. } => "FAILED",
        }
    }
}

/// A reupload waiting for its instant.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledReupload {
    pub id: String,
    pub video_id: String,
    pub destinations: Vec<String>,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub state: ScheduleState,
    /// When the entry left Waiting/Firing.
    pub settled_at: Option<DateTime<Utc>>,
}

impl ScheduledReupload {
    /// Task id, once fired.
    pub fn task_id(&self) -> Option<&str> {
        match &self.state {
            ScheduleState::Fired { task_id } => Some(task_id),
            _ => None,
        }
    }

    fn settle(&mut self, state: ScheduleState) {
        self.state = state;
        self.settled_at = Some(Utc::now());
    }
}

/// How long settled entries stay visible.
pub const DEFAULT_SETTLED_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Holds timers for deferred submissions.
#[derive(Clone)]
pub struct Scheduler {
    orchestrator: TaskOrchestrator,
    entries: Arc<DashMap<String, ScheduledReupload>>,
    timers: Arc<DashMap<String, CancellationToken>>,
    retention: Duration,
    shutdown_token: CancellationToken,
}

impl Scheduler {
    pub fn new(orchestrator: TaskOrchestrator) -> Self {
        Self {
            orchestrator,
            entries: Arc::new(DashMap::new()),
            timers: Arc::new(DashMap::new()),
            retention: DEFAULT_SETTLED_RETENTION,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Submit now, or schedule when the request carries `schedule_at`.
    pub async fn dispatch(&self, request: ReuploadRequest) -> Result<ScheduledReupload> {
        let at = request.settings.schedule_at.unwrap_or_else(Utc::now);
        self.schedule(request, at).await
    }

    /// Schedule `request` for `at`.
    ///
    /// The request is validated immediately so a bad request is rejected
    /// here rather than when the timer fires.
    pub async fn schedule(
        &self,
        request: ReuploadRequest,
        at: DateTime<Utc>,
    ) -> Result<ScheduledReupload> {
        let task = self.orchestrator.prepare(request.clone())?;
        self.prune();

        let mut entry = ScheduledReupload {
            id: uuid::Uuid::new_v4().to_string(),
            video_id: task.video_id,
            destinations: task.destinations,
            run_at: at,
            created_at: Utc::now(),
            state: ScheduleState::Waiting,
            settled_at: None,
        };

        let now = Utc::now();
        if at <= now {
            debug!(schedule_id = %entry.id, "Schedule instant already passed, submitting now");
            let task_id = self.orchestrator.submit(request).await?;
            entry.settle(ScheduleState::Fired { task_id });
            self.entries.insert(entry.id.clone(), entry.clone());
            return Ok(entry);
        }

        let delay = (at - now).to_std().unwrap_or(Duration::ZERO);
        let token = self.shutdown_token.child_token();
        self.timers.insert(entry.id.clone(), token.clone());
        self.entries.insert(entry.id.clone(), entry.clone());
        info!(
            schedule_id = %entry.id,
            run_at = %at,
            delay_ms = delay.as_millis() as u64,
            "Reupload scheduled"
        );

        let this = self.clone();
        let schedule_id = entry.id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(schedule_id = %schedule_id, "Schedule timer stopped");
                }
                _ = tokio::time::sleep(delay) => {
                    this.fire(&schedule_id, request).await;
                }
            }
            this.timers.remove(&schedule_id);
        });

        Ok(entry)
    }

    async fn fire(&self, schedule_id: &str, request: ReuploadRequest) {
        // Claim the entry under its lock; a cancel that got there first wins.
        {
            let Some(mut entry) = self.entries.get_mut(schedule_id) else {
                return;
            };
            if !entry.state.is_waiting() {
                return;
            }
            entry.state = ScheduleState::Firing;
        }

        let state = match self.orchestrator.submit(request).await {
            Ok(task_id) => {
                info!(schedule_id, task_id = %task_id, "Scheduled reupload submitted");
                ScheduleState::Fired { task_id }
            }
            Err(e) => {
                warn!(schedule_id, "Scheduled reupload rejected: {}", e);
                ScheduleState::Failed {
                    error: e.to_string(),
                }
            }
        };
        if let Some(mut entry) = self.entries.get_mut(schedule_id) {
            entry.settle(state);
        }
    }

    /// Cancel a scheduled reupload that has not fired yet.
    pub fn cancel(&self, schedule_id: &str) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(schedule_id)
            .ok_or_else(|| Error::not_found("ScheduledReupload", schedule_id))?;
        if !entry.state.is_waiting() {
            return Err(Error::invalid_transition(entry.state.label(), "CANCELLED"));
        }
        entry.settle(ScheduleState::Cancelled);
        drop(entry);

        if let Some((_, token)) = self.timers.remove(schedule_id) {
            token.cancel();
        }
        info!(schedule_id, "Scheduled reupload cancelled");
        Ok(())
    }

    pub fn get(&self, schedule_id: &str) -> Option<ScheduledReupload> {
        self.entries.get(schedule_id).map(|e| e.clone())
    }

    /// All entries, soonest first.
    pub fn list(&self) -> Vec<ScheduledReupload> {
        let mut list: Vec<ScheduledReupload> = self.entries.iter().map(|e| e.clone()).collect();
        list.sort_by(|a, b| a.run_at.cmp(&b.run_at));
        list
    }

    /// Entries not yet handed to the orchestrator.
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|e| !e.state.is_settled()).count()
    }

    /// Drop entries settled longer than the retention period ago.
    pub fn prune(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.settled_at.is_none_or(|at| {
                (now - at)
                    .to_std()
                    .map_or(true, |age| age < self.retention)
            })
        });
        let pruned = before.saturating_sub(self.entries.len());
        if pruned > 0 {
            debug!(pruned, "Pruned settled schedule entries");
        }
        pruned
    }

    /// Stop every timer; waiting entries become cancelled.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
        for mut entry in self.entries.iter_mut() {
            if entry.state.is_waiting() {
                entry.settle(ScheduleState::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::{DEFAULT_TASK_LEASE, TaskRepository};
    use crate::domain::{
        DestinationCatalog, PublishMetadata, ReuploadTask, TaskStatus, VideoLibrary,
    };
    use crate::history::InMemoryHistoryStore;
    use crate::orchestrator::OrchestratorConfig;
    use crate::pipeline::{FfmpegTransformer, MediaPipeline};
    use crate::publisher::{PublisherRegistry, SimulationConfig};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::{Notify, Semaphore};

    /// Task store whose saves block until the gate is closed.
    struct GatedTaskRepository {
        gate: Semaphore,
        entered: Notify,
        tasks: DashMap<String, ReuploadTask>,
    }

    impl GatedTaskRepository {
        fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                entered: Notify::new(),
                tasks: DashMap::new(),
            }
        }

        fn open(&self) {
            self.gate.close();
        }
    }

    #[async_trait]
    impl TaskRepository for GatedTaskRepository {
        async fn save_task(&self, task: &ReuploadTask) -> Result<()> {
            self.entered.notify_one();
            // Closed gate: acquire fails and the save goes through.
            let _ = self.gate.acquire().await;
            self.tasks.insert(task.id.clone(), task.clone());
            Ok(())
        }

        async fn get_task(&self, id: &str) -> Result<ReuploadTask> {
            self.tasks
                .get(id)
                .map(|t| t.clone())
                .ok_or_else(|| Error::not_found("ReuploadTask", id))
        }

        async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<ReuploadTask>> {
            Ok(self
                .tasks
                .iter()
                .filter(|t| status.is_none_or(|s| t.status == s))
                .map(|t| t.clone())
                .collect())
        }

        async fn delete_task(&self, id: &str) -> Result<()> {
            self.tasks.remove(id);
            Ok(())
        }

        async fn renew_leases(&self) -> Result<u64> {
            Ok(0)
        }

        async fn fail_interrupted(&self) -> Result<u64> {
            Ok(0)
        }

        fn lease_duration(&self) -> Duration {
            DEFAULT_TASK_LEASE
        }
    }

    fn orchestrator() -> (TaskOrchestrator, String) {
        let library = Arc::new(VideoLibrary::new());
        let video_id = library.ingest("clip.mp4", vec![1u8; 32]).id;
        let orchestrator = TaskOrchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(DestinationCatalog::builtin()),
            library,
            MediaPipeline::new(Arc::new(FfmpegTransformer::new())),
            Arc::new(PublisherRegistry::simulated(SimulationConfig::instant())),
            Arc::new(InMemoryHistoryStore::new()),
        );
        (orchestrator, video_id)
    }

    fn setup() -> (Scheduler, TaskOrchestrator, String) {
        let (orchestrator, video_id) = orchestrator();
        (Scheduler::new(orchestrator.clone()), orchestrator, video_id)
    }

    fn request(video_id: &str) -> ReuploadRequest {
        ReuploadRequest::new(video_id, ["instagram"])
            .with_metadata(PublishMetadata::new("Clip").with_description("desc"))
    }

    #[tokio::test]
    async fn test_past_instant_fires_immediately() {
        let (scheduler, orchestrator, video_id) = setup();
        let entry = scheduler
            .schedule(request(&video_id), Utc::now() - ChronoDuration::minutes(5))
            .await
            .unwrap();

        let task_id = entry.task_id().expect("fired").to_string();
        let task = orchestrator.wait(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_instant_does_not_start_early() {
        let (scheduler, orchestrator, video_id) = setup();
        let entry = scheduler
            .schedule(request(&video_id), Utc::now() + ChronoDuration::milliseconds(200))
            .await
            .unwrap();

        assert!(entry.state.is_waiting());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(orchestrator.list_tasks(None).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let fired = scheduler.get(&entry.id).unwrap();
        let task_id = fired.task_id().expect("fired").to_string();
        assert_eq!(orchestrator.wait(&task_id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_waiting_entry() {
        let (scheduler, orchestrator, video_id) = setup();
        let entry = scheduler
            .schedule(request(&video_id), Utc::now() + ChronoDuration::milliseconds(100))
            .await
            .unwrap();

        scheduler.cancel(&entry.id).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let cancelled = scheduler.get(&entry.id).unwrap();
        assert_eq!(cancelled.state, ScheduleState::Cancelled);
        assert!(cancelled.settled_at.is_some());
        assert!(orchestrator.list_tasks(None).await.unwrap().is_empty());
        assert!(scheduler.cancel(&entry.id).is_err());
        assert!(scheduler.cancel("missing").is_err());
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_up_front() {
        let (scheduler, _, video_id) = setup();
        let err = scheduler
            .schedule(
                ReuploadRequest::new(video_id, ["myspace"]),
                Utc::now() + ChronoDuration::hours(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDestination(_)));
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_waiting() {
        let (scheduler, _, video_id) = setup();
        scheduler
            .schedule(request(&video_id), Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(scheduler.pending(), 1);

        scheduler.shutdown();
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.list()[0].state, ScheduleState::Cancelled);
    }

    #[tokio::test]
    async fn test_dispatch_without_schedule_submits_now() {
        let (scheduler, orchestrator, video_id) = setup();
        let entry = scheduler.dispatch(request(&video_id)).await.unwrap();
        let task_id = entry.task_id().unwrap().to_string();
        assert!(orchestrator.get_task(&task_id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_rejected_while_submission_in_flight() {
        let repo = Arc::new(GatedTaskRepository::new());
        let (orchestrator, video_id) = orchestrator();
        let orchestrator = orchestrator.with_task_repository(repo.clone());
        let scheduler = Scheduler::new(orchestrator.clone());

        let entry = scheduler
            .schedule(request(&video_id), Utc::now() + ChronoDuration::milliseconds(100))
            .await
            .unwrap();

        // Timer fired and the submission is stuck persisting the task.
        repo.entered.notified().await;
        assert_eq!(scheduler.get(&entry.id).unwrap().state, ScheduleState::Firing);
        assert_eq!(scheduler.pending(), 1);
        let err = scheduler.cancel(&entry.id).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));

        repo.open();
        let task_id = loop {
            if let Some(id) = scheduler.get(&entry.id).and_then(|e| e.task_id().map(String::from)) {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(orchestrator.wait(&task_id).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_settled_entries_are_pruned() {
        let (orchestrator, video_id) = orchestrator();
        let scheduler = Scheduler::new(orchestrator).with_retention(Duration::ZERO);

        let waiting = scheduler
            .schedule(request(&video_id), Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();
        let fired = scheduler
            .schedule(request(&video_id), Utc::now() - ChronoDuration::minutes(1))
            .await
            .unwrap();
        assert!(fired.settled_at.is_some());
        assert_eq!(scheduler.list().len(), 2);

        assert_eq!(scheduler.prune(), 1);
        assert!(scheduler.get(&fired.id).is_none());
        assert!(scheduler.get(&waiting.id).is_some());

        scheduler.cancel(&waiting.id).unwrap();
        assert_eq!(scheduler.prune(), 1);
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn test_default_retention_keeps_settled_entries() {
        let (scheduler, _, video_id) = setup();
        let fired = scheduler
            .schedule(request(&video_id), Utc::now() - ChronoDuration::minutes(1))
            .await
            .unwrap();
        assert_eq!(scheduler.prune(), 0);
        assert!(scheduler.get(&fired.id).is_some());
    }
}
