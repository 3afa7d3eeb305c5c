//! Task orchestrator service.

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ReuploadRequest, TaskEvent};
use crate::database::repositories::TaskRepository;
use crate::domain::{
    AttemptState, DestinationCatalog, DestinationConfig, FailureCode, PublishAttempt,
    PublishMetadata, ReuploadTask, TaskStatus, VideoLibrary, VideoStatus,
};
use crate::history::{HistoryRecord, HistoryStore};
use crate::pipeline::{MediaPipeline, TransformError, TransformedArtifact};
use crate::publisher::{PublishError, PublishOutcome, PublisherRegistry, validate_artifact};
use crate::rate_limit::{AdmissionPermit, RateLimiter};
use crate::{Error, Result};

/// Configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Tasks allowed to run at the same time.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Upper bound for one publish call. 0 disables the timeout.
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
    /// Upper bound for one media transform step. 0 disables the timeout.
    #[serde(default = "default_transform_timeout_secs")]
    pub transform_timeout_secs: u64,
    /// Lease on persisted unfinished tasks. Renewed every third of it while
    /// this process runs them; other processes only recover expired rows.
    #[serde(default = "default_task_lease_secs")]
    pub task_lease_secs: u64,
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_publish_timeout_secs() -> u64 {
    300
}

fn default_transform_timeout_secs() -> u64 {
    600
}

fn default_task_lease_secs() -> u64 {
    60
}

/// Floor for the lease renewal period.
const MIN_LEASE_RENEWAL: Duration = Duration::from_millis(100);

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            publish_timeout_secs: default_publish_timeout_secs(),
            transform_timeout_secs: default_transform_timeout_secs(),
            task_lease_secs: default_task_lease_secs(),
        }
    }
}

/// Failure of one publish try, before it is turned into an attempt.
type TryFailure = (FailureCode, String);

/// Sleep for `delay` unless the task is cancelled first. Returns false on cancellation.
async fn backoff(delay: Duration, token: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Drives reupload tasks from submission to a terminal status.
#[derive(Clone)]
pub struct TaskOrchestrator {
    config: OrchestratorConfig,
    catalog: Arc<DestinationCatalog>,
    library: Arc<VideoLibrary>,
    pipeline: MediaPipeline,
    publishers: Arc<PublisherRegistry>,
    limiter: Arc<RateLimiter>,
    history: Arc<dyn HistoryStore>,
    task_repo: Option<Arc<dyn TaskRepository>>,
    /// Tasks created by this process. Finished tasks are evicted once their
    /// terminal snapshot is persisted; without a repository they stay here.
    tasks: Arc<DashMap<String, ReuploadTask>>,
    cancellations: Arc<DashMap<String, CancellationToken>>,
    completions: Arc<DashMap<String, watch::Sender<bool>>>,
    claimed: Arc<DashSet<String>>,
    semaphore: Arc<Semaphore>,
    event_tx: broadcast::Sender<TaskEvent>,
}

impl TaskOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        catalog: Arc<DestinationCatalog>,
        library: Arc<VideoLibrary>,
        pipeline: MediaPipeline,
        publishers: Arc<PublisherRegistry>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let limiter = Arc::new(RateLimiter::new(catalog.clone(), history.clone()));
        let pipeline = if config.transform_timeout_secs > 0 {
            pipeline.with_step_timeout(Duration::from_secs(config.transform_timeout_secs))
        } else {
            pipeline
        };
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));

        Self {
            config,
            catalog,
            library,
            pipeline,
            publishers,
            limiter,
            history,
            task_repo: None,
            tasks: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
            completions: Arc::new(DashMap::new()),
            claimed: Arc::new(DashSet::new()),
            semaphore,
            event_tx,
        }
    }

    /// Persist task snapshots through `repo`.
    pub fn with_task_repository(mut self, repo: Arc<dyn TaskRepository>) -> Self {
        self.task_repo = Some(repo);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn library(&self) -> &Arc<VideoLibrary> {
        &self.library
    }

    pub fn catalog(&self) -> &Arc<DestinationCatalog> {
        &self.catalog
    }

    /// Subscribe to task lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Validate a request and build its pending task.
    pub(crate) fn prepare(&self, request: ReuploadRequest) -> Result<ReuploadTask> {
        if request.destinations.is_empty() {
            return Err(Error::NoDestinations);
        }

        let mut destinations: Vec<String> = Vec::with_capacity(request.destinations.len());
        for requested in &request.destinations {
            let destination = self
                .catalog
                .get(requested)
                .ok_or_else(|| Error::UnknownDestination(requested.clone()))?;
            if destinations.contains(&destination.id) {
                return Err(Error::validation(format!(
                    "destination '{}' is listed more than once",
                    destination.id
                )));
            }
            if !self.publishers.contains(&destination.id) {
                return Err(Error::config(format!(
                    "no publisher registered for destination '{}'",
                    destination.id
                )));
            }
            destinations.push(destination.id.clone());
        }

        let video = self
            .library
            .get(&request.video_id)
            .ok_or_else(|| Error::not_found("Video", &request.video_id))?;

        request.settings.validate()?;

        let metadata = request
            .metadata
            .unwrap_or_else(|| PublishMetadata::for_file_name(&video.name));

        Ok(ReuploadTask::new(
            video.id,
            video.name,
            destinations,
            request.settings,
            metadata,
        ))
    }

    async fn register(&self, task: ReuploadTask) -> Result<String> {
        if let Some(repo) = &self.task_repo {
            repo.save_task(&task).await?;
        }

        let task_id = task.id.clone();
        self.library.retain(&task.video_id);
        let (done_tx, _) = watch::channel(false);
        self.completions.insert(task_id.clone(), done_tx);
        self.cancellations
            .insert(task_id.clone(), CancellationToken::new());

        info!(
            task_id = %task_id,
            video = %task.video_name,
            destinations = ?task.destinations,
            "Reupload task submitted"
        );
        self.emit(TaskEvent::Submitted {
            task_id: task_id.clone(),
            video_id: task.video_id.clone(),
            destinations: task.destinations.clone(),
        });
        self.tasks.insert(task_id.clone(), task);
        Ok(task_id)
    }

    /// Validate, persist and start a task in the background.
    pub async fn submit(&self, request: ReuploadRequest) -> Result<String> {
        let task = self.prepare(request)?;
        let task_id = self.register(task).await?;

        let this = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run(&id).await {
                error!(task_id = %id, "Task run failed: {}", e);
            }
        });

        Ok(task_id)
    }

    /// Submit and run inline, returning the terminal task.
    pub async fn execute(&self, request: ReuploadRequest) -> Result<ReuploadTask> {
        let task = self.prepare(request)?;
        let task_id = self.register(task).await?;
        self.run(&task_id).await
    }

    fn update<R>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut ReuploadTask) -> Result<R>,
    ) -> Result<(R, ReuploadTask)> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::not_found("ReuploadTask", task_id))?;
        let value = f(&mut entry)?;
        Ok((value, entry.clone()))
    }

    /// Save a snapshot. True when a repository stored it.
    async fn persist(&self, task: &ReuploadTask) -> bool {
        let Some(repo) = &self.task_repo else {
            return false;
        };
        match repo.save_task(task).await {
            Ok(()) => true,
            Err(e) => {
                warn!(task_id = %task.id, "Failed to persist task snapshot: {}", e);
                false
            }
        }
    }

    /// Run a pending task to completion.
    ///
    /// Only fails when the task is unknown or already claimed by another run;
    /// everything that goes wrong while processing ends up as attempt failures.
    pub async fn run(&self, task_id: &str) -> Result<ReuploadTask> {
        let token = self
            .cancellations
            .get(task_id)
            .map(|t| t.clone())
            .ok_or_else(|| Error::not_found("ReuploadTask", task_id))?;
        if !self.claimed.insert(task_id.to_string()) {
            return Err(Error::validation(format!(
                "task {task_id} is already being run"
            )));
        }

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            let ((), task) = self.update(task_id, |t| t.cancel_pending())?;
            info!(task_id, "Task cancelled before start");
            return Ok(self.complete(task).await);
        };

        let ((), task) = self.update(task_id, |t| t.start())?;
        self.persist(&task).await;
        self.emit(TaskEvent::Started {
            task_id: task_id.to_string(),
        });
        info!(task_id, destinations = task.destinations.len(), "Task started");

        match self.media_step(&task, &token).await {
            Ok(artifact) => {
                for destination_id in &task.destinations {
                    if token.is_cancelled() {
                        info!(task_id, "Cancellation requested, skipping remaining destinations");
                        break;
                    }
                    let (attempt, permit) = match self.catalog.get(destination_id) {
                        Some(destination) => {
                            self.publish_to(&task, destination, &artifact, &token).await
                        }
                        None => (
                            PublishAttempt::failure(
                                &task.id,
                                destination_id,
                                FailureCode::RemoteRejected,
                                "destination is no longer configured",
                                0,
                            ),
                            None,
                        ),
                    };
                    self.record(&task, attempt, permit).await;
                }
            }
            Err((err, retries_used)) => {
                error!(task_id, "Media step failed: {}", err);
                let message = err.to_string();
                if let Some(first) = task.destinations.first() {
                    let attempt = PublishAttempt::failure(
                        &task.id,
                        first,
                        FailureCode::TransformFailed,
                        message.clone(),
                        retries_used,
                    );
                    self.record(&task, attempt, None).await;
                }
                let _ = self.update(task_id, |t| {
                    t.error = Some(format!("media step failed: {message}"));
                    Ok(())
                });
            }
        }

        let cancelled = token.is_cancelled();
        let (status, task) = self.update(task_id, |t| {
            let status = t.finish(cancelled)?;
            if status == TaskStatus::Failed && t.error.is_none() {
                t.error = Some(format!(
                    "{} of {} destination(s) failed",
                    t.failed_attempts(),
                    t.destinations.len()
                ));
            }
            Ok(status)
        })?;

        info!(
            task_id,
            %status,
            succeeded = task.successful_attempts(),
            failed = task.failed_attempts(),
            "Task finished"
        );
        Ok(self.complete(task).await)
    }

    /// Terminal bookkeeping shared by every exit of `run`.
    async fn complete(&self, task: ReuploadTask) -> ReuploadTask {
        let persisted = self.persist(&task).await;
        self.library.release(&task.video_id);
        self.cancellations.remove(&task.id);
        self.emit(TaskEvent::Finished {
            task_id: task.id.clone(),
            status: task.status,
            error: task.error.clone(),
        });
        if let Some(done) = self.completions.get(&task.id) {
            done.send_replace(true);
        }
        if persisted {
            // Later lookups go to the repository.
            self.tasks.remove(&task.id);
            self.completions.remove(&task.id);
            self.claimed.remove(&task.id);
            debug!(task_id = %task.id, "Finished task evicted from memory");
        }
        task
    }

    /// Apply the media step, retrying within the task's budget.
    async fn media_step(
        &self,
        task: &ReuploadTask,
        token: &CancellationToken,
    ) -> std::result::Result<TransformedArtifact, (TransformError, u32)> {
        let Some(asset) = self.library.get(&task.video_id) else {
            return Err((
                TransformError::StepFailed {
                    step: "load".to_string(),
                    reason: format!("video {} is no longer available", task.video_id),
                },
                0,
            ));
        };

        let policy = task.settings.effective_retry();
        let library = Arc::clone(&self.library);
        let video_id = asset.id.clone();
        let progress = move |p: u8| library.set_progress(&video_id, p);

        self.library.set_status(&asset.id, VideoStatus::Processing);
        let mut retries_used = 0;
        loop {
            match self.pipeline.transform(&asset, &task.settings, &progress).await {
                Ok(artifact) => {
                    self.library.set_status(&asset.id, VideoStatus::Completed);
                    return Ok(artifact);
                }
                Err(err) => {
                    let retryable = matches!(err, TransformError::StepFailed { .. });
                    if retryable && policy.should_retry(retries_used) && !token.is_cancelled() {
                        let delay = policy.delay_for(retries_used, FailureCode::TransformFailed);
                        warn!(
                            task_id = %task.id,
                            retry = retries_used + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Media step failed, retrying: {}",
                            err
                        );
                        if backoff(delay, token).await {
                            retries_used += 1;
                            continue;
                        }
                    }
                    self.library.set_status(&asset.id, VideoStatus::Failed);
                    return Err((err, retries_used));
                }
            }
        }
    }

    async fn publish_to(
        &self,
        task: &ReuploadTask,
        destination: &DestinationConfig,
        artifact: &TransformedArtifact,
        token: &CancellationToken,
    ) -> (PublishAttempt, Option<AdmissionPermit>) {
        match self.drive_attempt(task, destination, artifact, token).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(task_id = %task.id, destination = %destination.id, "Attempt aborted: {}", e);
                (
                    PublishAttempt::failure(
                        &task.id,
                        &destination.id,
                        FailureCode::NetworkError,
                        e.to_string(),
                        0,
                    ),
                    None,
                )
            }
        }
    }

    /// Attempt state machine for one destination: tries and retries until
    /// success, a non-retryable failure, an exhausted budget or cancellation.
    async fn drive_attempt(
        &self,
        task: &ReuploadTask,
        destination: &DestinationConfig,
        artifact: &TransformedArtifact,
        token: &CancellationToken,
    ) -> Result<(PublishAttempt, Option<AdmissionPermit>)> {
        let policy = task.settings.effective_retry();
        let mut retries_used = 0;
        let mut state = AttemptState::Pending;

        loop {
            state = state.transition_to(AttemptState::Running)?;
            debug!(task_id = %task.id, destination = %destination.id, retries_used, "Publishing");

            match self.try_publish(task, destination, artifact).await {
                Ok((outcome, permit)) => {
                    state.transition_to(AttemptState::Success)?;
                    info!(
                        task_id = %task.id,
                        destination = %destination.id,
                        remote_id = %outcome.remote_id,
                        retries_used,
                        "Published"
                    );
                    let attempt = PublishAttempt::success(
                        &task.id,
                        &destination.id,
                        outcome.remote_id,
                        outcome.url,
                        outcome.engagement,
                        retries_used,
                    );
                    return Ok((attempt, Some(permit)));
                }
                Err((code, message)) => {
                    state = state.transition_to(AttemptState::Failure)?;

                    if code.is_retryable() && policy.should_retry(retries_used) && !token.is_cancelled()
                    {
                        let delay = policy.delay_for(retries_used, code);
                        warn!(
                            task_id = %task.id,
                            destination = %destination.id,
                            %code,
                            retry = retries_used + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Publish failed, retrying: {}",
                            message
                        );
                        if backoff(delay, token).await {
                            retries_used += 1;
                            state = state.transition_to(AttemptState::Pending)?;
                            continue;
                        }
                    }

                    warn!(
                        task_id = %task.id,
                        destination = %destination.id,
                        %code,
                        retries_used,
                        "Publish failed: {}",
                        message
                    );
                    let attempt = PublishAttempt::failure(
                        &task.id,
                        &destination.id,
                        code,
                        message,
                        retries_used,
                    );
                    return Ok((attempt, None));
                }
            }
        }
    }

    /// Local checks, admission, then the publisher call.
    async fn try_publish(
        &self,
        task: &ReuploadTask,
        destination: &DestinationConfig,
        artifact: &TransformedArtifact,
    ) -> std::result::Result<(PublishOutcome, AdmissionPermit), TryFailure> {
        validate_artifact(artifact, &task.metadata, destination)
            .map_err(|e| (e.code(), e.to_string()))?;

        let permit = match self.limiter.acquire(&destination.id, Utc::now()).await {
            Ok(Some(permit)) => permit,
            Ok(None) => {
                return Err((
                    FailureCode::RateLimited,
                    format!("{} publish limit reached", destination.name),
                ));
            }
            Err(e) => {
                return Err((
                    FailureCode::RateLimited,
                    format!("rate window unavailable: {e}"),
                ));
            }
        };

        let publisher = self.publishers.get(&destination.id).ok_or_else(|| {
            (
                FailureCode::RemoteRejected,
                format!("no publisher registered for {}", destination.id),
            )
        })?;

        let call = publisher.publish(artifact, &task.metadata, destination);
        let published = if self.config.publish_timeout_secs == 0 {
            call.await
        } else {
            let timeout = Duration::from_secs(self.config.publish_timeout_secs);
            match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(PublishError::NetworkError(format!(
                    "publish timed out after {}s",
                    timeout.as_secs()
                ))),
            }
        };

        published
            .map(|outcome| (outcome, permit))
            .map_err(|e| (e.code(), e.to_string()))
    }

    /// Store a resolved attempt on the task and in history.
    ///
    /// The admission permit is released only after the history append.
    async fn record(
        &self,
        task: &ReuploadTask,
        attempt: PublishAttempt,
        permit: Option<AdmissionPermit>,
    ) {
        let snapshot = match self.update(&task.id, |t| t.record_attempt(attempt.clone())) {
            Ok(((), snapshot)) => snapshot,
            Err(e) => {
                error!(task_id = %task.id, "Failed to record attempt: {}", e);
                return;
            }
        };

        let record = HistoryRecord::from_attempt(&attempt, &task.video_name);
        if let Err(e) = self.history.append(&record).await {
            error!(task_id = %task.id, destination = %attempt.destination_id, "Failed to append history: {}", e);
        }
        drop(permit);

        self.persist(&snapshot).await;
        self.emit(TaskEvent::AttemptRecorded {
            task_id: task.id.clone(),
            attempt,
        });
    }

    /// Request cancellation.
    ///
    /// A publish already in progress finishes and is recorded; no further
    /// destination starts. Pending tasks are cancelled before they start.
    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        let known = self.tasks.get(task_id).map(|t| t.status);
        let status = match known {
            Some(status) => status,
            None => self.get_task(task_id).await?.status,
        };
        if status.is_terminal() {
            return Err(Error::invalid_transition(status, TaskStatus::Cancelled));
        }
        if let Some(token) = self.cancellations.get(task_id) {
            token.cancel();
            info!(task_id, "Task cancellation requested");
        }
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<ReuploadTask> {
        if let Some(task) = self.tasks.get(task_id) {
            return Ok(task.clone());
        }
        match &self.task_repo {
            Some(repo) => repo.get_task(task_id).await,
            None => Err(Error::not_found("ReuploadTask", task_id)),
        }
    }

    /// Every known task, newest first.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<ReuploadTask>> {
        let mut by_id: HashMap<String, ReuploadTask> = HashMap::new();
        if let Some(repo) = &self.task_repo {
            for task in repo.list_tasks(status).await? {
                by_id.insert(task.id.clone(), task);
            }
        }
        // In-memory snapshots are the most recent.
        for entry in self.tasks.iter() {
            if status.is_none_or(|s| entry.status == s) {
                by_id.insert(entry.key().clone(), entry.value().clone());
            } else {
                by_id.remove(entry.key());
            }
        }

        let mut tasks: Vec<ReuploadTask> = by_id.into_values().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    /// Wait until a task reaches a terminal status.
    pub async fn wait(&self, task_id: &str) -> Result<ReuploadTask> {
        let rx = self.completions.get(task_id).map(|tx| tx.subscribe());
        if let Some(mut rx) = rx {
            // Sender lives as long as the orchestrator.
            let _ = rx.wait_for(|done| *done).await;
        }
        self.get_task(task_id).await
    }

    /// Tasks of this process not yet terminal.
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_terminal()).count()
    }

    /// Mark tasks left unfinished by a previous process as failed.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let Some(repo) = &self.task_repo else {
            return Ok(0);
        };
        let count = repo.fail_interrupted().await?;
        if count > 0 {
            warn!(count, "Marked interrupted tasks as failed");
        }
        Ok(count)
    }

    /// Keep the leases of this process's unfinished tasks alive until
    /// `token` is cancelled. None without a task repository.
    pub fn start_lease_renewal(&self, token: CancellationToken) -> Option<JoinHandle<()>> {
        let repo = self.task_repo.clone()?;
        let period = (repo.lease_duration() / 3).max(MIN_LEASE_RENEWAL);
        let this = self.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if this.active_count() == 0 {
                    continue;
                }
                match repo.renew_leases().await {
                    Ok(renewed) => debug!(renewed, "Task leases renewed"),
                    Err(e) => warn!("Failed to renew task leases: {}", e),
                }
            }
            debug!("Lease renewal stopped");
        }))
    }

    /// Cancel every unfinished task.
    pub fn shutdown(&self) {
        for token in self.cancellations.iter() {
            token.cancel();
        }
    }
}
