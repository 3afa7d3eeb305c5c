//! Service container for dependency injection.
//!
//! Builds every service from an [`AppConfig`] and owns their lifecycle.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::config::AppConfig;
use crate::database::{self, DbPool};
use crate::database::repositories::{
    DestinationRepository, SqlxDestinationRepository, SqlxTaskRepository, TaskRepository,
};
use crate::domain::{DestinationCatalog, VideoLibrary};
use crate::history::{HistoryPurgeService, HistoryService, HistoryStore, SqlxHistoryStore};
use crate::orchestrator::TaskOrchestrator;
use crate::pipeline::{FfmpegTransformer, MediaPipeline};
use crate::publisher::PublisherRegistry;
use crate::scheduler::Scheduler;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Point-in-time counters across services.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub destination_count: usize,
    pub video_count: usize,
    pub active_tasks: usize,
    pub scheduled_pending: usize,
}

/// Service container holding all application services.
pub struct ServiceContainer {
    pub pool: DbPool,
    pub config: AppConfig,
    pub catalog: Arc<DestinationCatalog>,
    pub library: Arc<VideoLibrary>,
    pub history: HistoryService,
    pub orchestrator: TaskOrchestrator,
    pub scheduler: Scheduler,
    pub destination_repo: Arc<dyn DestinationRepository>,
    pub task_repo: Arc<dyn TaskRepository>,
    purge_service: HistoryPurgeService,
    background: Mutex<Vec<JoinHandle<()>>>,
    cancellation_token: CancellationToken,
    /// Stops lease renewal; cancelled only after running tasks drained.
    lease_token: CancellationToken,
}

impl ServiceContainer {
    /// Connect to the configured database and build the services.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = database::connect(&config.database_url).await?;
        Self::with_pool(pool, config).await
    }

    /// Build the services over an already migrated pool.
    pub async fn with_pool(pool: DbPool, config: AppConfig) -> Result<Self> {
        info!("Initializing service container");

        let destination_repo: Arc<dyn DestinationRepository> =
            Arc::new(SqlxDestinationRepository::new(pool.clone()));
        let task_repo: Arc<dyn TaskRepository> = Arc::new(
            SqlxTaskRepository::new(pool.clone())
                .with_lease(Duration::from_secs(config.orchestrator.task_lease_secs)),
        );
        let history_store: Arc<dyn HistoryStore> = Arc::new(SqlxHistoryStore::new(pool.clone()));

        let catalog = Arc::new(config.catalog()?);
        destination_repo.sync_destinations(&config.destinations).await?;

        let publishers = Arc::new(PublisherRegistry::simulated(config.simulation.clone()));
        publishers.ensure_covers(&catalog)?;

        let pipeline = MediaPipeline::new(Arc::new(FfmpegTransformer::with_ffmpeg_path(
            config.ffmpeg_path.clone(),
        )));
        let library = Arc::new(VideoLibrary::new());

        let orchestrator = TaskOrchestrator::new(
            config.orchestrator.clone(),
            catalog.clone(),
            library.clone(),
            pipeline,
            publishers,
            history_store.clone(),
        )
        .with_task_repository(task_repo.clone());
        let scheduler = Scheduler::new(orchestrator.clone());

        let purge_service = HistoryPurgeService::new(config.history.clone(), history_store.clone());

        info!(
            destinations = catalog.len(),
            max_concurrent_tasks = config.orchestrator.max_concurrent_tasks,
            "Service container initialized"
        );

        Ok(Self {
            pool,
            config,
            catalog,
            library,
            history: HistoryService::new(history_store),
            orchestrator,
            scheduler,
            destination_repo,
            task_repo,
            purge_service,
            background: Mutex::new(Vec::new()),
            cancellation_token: CancellationToken::new(),
            lease_token: CancellationToken::new(),
        })
    }

    /// Recover tasks whose owning process died and start background services.
    pub async fn initialize(&self) -> Result<()> {
        self.orchestrator.recover_interrupted().await?;
        let purge = self
            .purge_service
            .start_background_task(self.cancellation_token.child_token());
        let mut background = self.background.lock();
        background.push(purge);
        if let Some(renewal) = self.orchestrator.start_lease_renewal(self.lease_token.clone()) {
            background.push(renewal);
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop timers, cancel running tasks and close the pool.
    ///
    /// Running tasks get `timeout` to record their in-flight publish.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();
        self.scheduler.shutdown();
        self.orchestrator.shutdown();

        let drained = tokio::time::timeout(timeout, async {
            while self.orchestrator.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                active = self.orchestrator.active_count(),
                "Shutdown timeout reached, forcing shutdown"
            );
        }

        self.lease_token.cancel();
        let handles: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.pool.close().await;
        info!("Services shut down");
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            destination_count: self.catalog.len(),
            video_count: self.library.list().len(),
            active_tasks: self.orchestrator.active_count(),
            scheduled_pending: self.scheduler.pending(),
        }
    }
}
