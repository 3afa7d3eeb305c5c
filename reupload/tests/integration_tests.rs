//! Integration tests over a real SQLite database file.
//!
//! Each test opens the database, runs reuploads with the simulated
//! publishers, and reopens it to check what survived.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use reupload::config::AppConfig;
use reupload::database::repositories::{SqlxTaskRepository, TaskRepository};
use reupload::database::{self, DbPool};
use reupload::domain::{
    DestinationConfig, FailureCode, PublishMetadata, ReuploadSettings, ReuploadTask, RetryPolicy,
    TaskStatus,
};
use reupload::history::{HistoryFilter, HistoryStore, SqlxHistoryStore};
use reupload::orchestrator::{ReuploadRequest, TaskEvent};
use reupload::publisher::SimulationConfig;
use reupload::services::ServiceContainer;

fn file_config(dir: &Path) -> AppConfig {
    AppConfig {
        database_url: format!("sqlite:{}?mode=rwc", dir.join("reupload.db").display()),
        simulation: SimulationConfig::instant(),
        ..AppConfig::default()
    }
}

fn full_metadata() -> PublishMetadata {
    PublishMetadata::new("Sunset timelapse")
        .with_description("Shot on the pier")
        .with_tags(["sunset", "timelapse"])
}

fn request(video_id: &str, destinations: &[&str]) -> ReuploadRequest {
    ReuploadRequest::new(video_id, destinations.iter().copied())
        .with_metadata(full_metadata())
        .with_settings(ReuploadSettings::default().with_retry(RetryPolicy::no_retry()))
}

async fn open(config: &AppConfig) -> ServiceContainer {
    let container = ServiceContainer::new(config.clone())
        .await
        .expect("Failed to build service container");
    container.initialize().await.expect("Failed to initialize");
    container
}

async fn setup_memory_db() -> DbPool {
    database::connect("sqlite::memory:")
        .await
        .expect("Failed to create test pool")
}

mod end_to_end {
    use super::*;

    #[tokio::test]
    async fn test_reupload_survives_restart() {
        let dir = TempDir::new().unwrap();
        let config = file_config(dir.path());

        let task_id = {
            let container = open(&config).await;
            let video = container.library.ingest("sunset.mp4", vec![0u8; 4096]);

            let task = container
                .orchestrator
                .execute(request(&video.id, &["tiktok", "youtube", "instagram"]))
                .await
                .unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
            assert_eq!(task.attempts.len(), 3);

            let stats = container.history.stats().await.unwrap();
            assert_eq!(stats.total_uploads, 3);
            assert_eq!(stats.successful_uploads, 3);
            assert_eq!(stats.success_rate, 100.0);

            container.shutdown_with_timeout(Duration::from_secs(1)).await.unwrap();
            task.id
        };

        let container = open(&config).await;
        let task = container.orchestrator.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.attempts.len(), 3);
        assert!(task.attempts.iter().all(|a| a.is_success()));

        let records = container
            .history
            .list(&HistoryFilter::new().destination("YouTube"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_id, task_id);
        assert_eq!(records[0].video_name, "sunset.mp4");

        let listed = container.orchestrator.list_tasks(None).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_window_counts_persisted_history() {
        let dir = TempDir::new().unwrap();
        let mut config = file_config(dir.path());
        for destination in &mut config.destinations {
            if destination.id == "tiktok" {
                *destination = DestinationConfig::tiktok().with_rate_limit(1, 1);
            }
        }

        {
            let container = open(&config).await;
            let video = container.library.ingest("a.mp4", vec![0u8; 64]);
            let task = container
                .orchestrator
                .execute(request(&video.id, &["tiktok"]))
                .await
                .unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
            container.shutdown_with_timeout(Duration::from_secs(1)).await.unwrap();
        }

        let container = open(&config).await;
        let video = container.library.ingest("b.mp4", vec![0u8; 64]);
        let task = container
            .orchestrator
            .execute(request(&video.id, &["tiktok", "instagram"]))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts[0].failure_code(), Some(FailureCode::RateLimited));
        assert!(task.attempts[1].is_success());

        let windows = container
            .orchestrator
            .limiter()
            .windows(chrono::Utc::now())
            .await
            .unwrap();
        let tiktok = windows.iter().find(|w| w.destination_id == "tiktok").unwrap();
        assert_eq!(tiktok.daily_used, 1);
        assert!(!tiktok.has_capacity());
    }

    #[tokio::test]
    async fn test_interrupted_tasks_fail_on_start() {
        let dir = TempDir::new().unwrap();
        let config = file_config(dir.path());

        {
            let pool = database::connect(&config.database_url).await.unwrap();
            // A crashed process: its lease is already over.
            let repo = SqlxTaskRepository::new(pool.clone()).with_lease(Duration::ZERO);
            let mut task = ReuploadTask::new(
                "video-1",
                "lost.mp4",
                vec!["youtube".to_string()],
                ReuploadSettings::default(),
                full_metadata(),
            );
            task.start().unwrap();
            repo.save_task(&task).await.unwrap();
            pool.close().await;
        }

        let container = open(&config).await;
        let failed = container
            .orchestrator
            .list_tasks(Some(TaskStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.is_some());
        assert!(failed[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_second_process_leaves_live_tasks_alone() {
        let dir = TempDir::new().unwrap();
        let mut config = file_config(dir.path());
        config.simulation = SimulationConfig {
            latency_ms: 500,
            failure_rate: 0.0,
        };

        let first = open(&config).await;
        let video = first.library.ingest("live.mp4", vec![0u8; 256]);
        let mut events = first.orchestrator.subscribe();
        let task_id = first
            .orchestrator
            .submit(request(&video.id, &["instagram", "youtube"]))
            .await
            .unwrap();
        loop {
            if let TaskEvent::Started { task_id: started } = events.recv().await.unwrap()
                && started == task_id
            {
                break;
            }
        }

        // Starting a second process over the same database runs recovery.
        let second = open(&config).await;
        let seen = second.orchestrator.get_task(&task_id).await.unwrap();
        assert_eq!(seen.status, TaskStatus::Running);
        assert!(seen.error.is_none());

        let done = first.orchestrator.wait(&task_id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.attempts.len(), 2);

        let stored = second.orchestrator.get_task(&task_id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.error.is_none());
        assert_eq!(stored.attempts.len(), 2);

        second.shutdown_with_timeout(Duration::from_secs(1)).await.unwrap();
        first.shutdown_with_timeout(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_failure_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let container = open(&file_config(dir.path())).await;
        let video = container.library.ingest("clip.mp4", vec![0u8; 8]);

        let err = container
            .orchestrator
            .submit(request(&video.id, &["tiktok", "vine"]))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(container.orchestrator.list_tasks(None).await.unwrap().is_empty());
        assert!(container.history.list(&HistoryFilter::new()).await.unwrap().is_empty());
    }
}

mod history_store {
    use super::*;
    use reupload::domain::{Engagement, PublishAttempt};
    use reupload::history::HistoryRecord;

    #[tokio::test]
    async fn test_sqlite_history_filters() {
        let pool = setup_memory_db().await;
        let store: Arc<dyn HistoryStore> = Arc::new(SqlxHistoryStore::new(pool));

        let ok = PublishAttempt::success(
            "t1",
            "tiktok",
            "7301",
            "https://www.tiktok.com/@me/video/7301",
            Engagement {
                views: 100,
                likes: 5,
                ..Default::default()
            },
            0,
        );
        let failed = PublishAttempt::failure("t1", "youtube", FailureCode::NetworkError, "reset", 2);
        store
            .append(&HistoryRecord::from_attempt(&ok, "clip.mp4"))
            .await
            .unwrap();
        store
            .append(&HistoryRecord::from_attempt(&failed, "clip.mp4"))
            .await
            .unwrap();

        assert_eq!(store.list(&HistoryFilter::new()).await.unwrap().len(), 2);
        assert_eq!(
            store.list(&HistoryFilter::new().successes()).await.unwrap().len(),
            1
        );

        let youtube = store
            .list(&HistoryFilter::new().destination("YOUTUBE"))
            .await
            .unwrap();
        assert_eq!(youtube.len(), 1);
        assert_eq!(youtube[0].failure_code(), Some(FailureCode::NetworkError));
        assert_eq!(youtube[0].retries_used, 2);

        let tiktok = store
            .list(&HistoryFilter::new().destination("tiktok"))
            .await
            .unwrap();
        assert_eq!(tiktok[0].engagement().views, 100);

        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.list(&HistoryFilter::new()).await.unwrap().is_empty());
    }
}
