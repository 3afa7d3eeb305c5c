use chrono::{Duration as ChronoDuration, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{debug, info, warn};

use reupload::domain::{ReuploadTask, TaskStatus};
use reupload::history::HistoryFilter;
use reupload::orchestrator::{ReuploadRequest, TaskEvent};
use reupload::scheduler::ScheduleState;
use reupload::services::ServiceContainer;

use crate::cli::{OutputFormat, RunArgs};
use crate::error::{CliError, Result};
use crate::output::{DestinationView, OutputManager};

/// How often a waiting schedule entry is checked.
const SCHEDULE_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct CommandExecutor {
    container: ServiceContainer,
    output: OutputManager,
    format: OutputFormat,
    show_progress: bool,
}

impl CommandExecutor {
    pub fn new(container: ServiceContainer, output: OutputManager, format: OutputFormat, quiet: bool) -> Self {
        Self {
            container,
            output,
            format,
            show_progress: format == OutputFormat::Pretty && !quiet,
        }
    }

    /// Ingest a file, run it to every destination and print the result.
    ///
    /// Ctrl-C cancels the task; the publish in progress still completes.
    pub async fn run(&self, args: RunArgs) -> Result<()> {
        let video = self.container.library.ingest_file(&args.file).await?;
        info!(video_id = %video.id, size = video.size_bytes, "Video loaded");

        let request = ReuploadRequest::new(video.id.clone(), args.destinations.iter().cloned())
            .with_metadata(args.metadata(&video.name))
            .with_settings(args.settings(&self.container.config.defaults));

        let mut events = self.container.orchestrator.subscribe();
        let entry = self.container.scheduler.dispatch(request).await?;

        let task_id = match entry.task_id() {
            Some(task_id) => task_id.to_string(),
            None => {
                print!("{}", self.output.format_scheduled(&entry)?);
                self.wait_for_schedule(&entry.id).await?
            }
        };

        let bar = self.progress_bar(&args);
        let orchestrator = &self.container.orchestrator;
        let waiter = orchestrator.wait(&task_id);
        tokio::pin!(waiter);
        let mut interrupted = false;

        let task = loop {
            tokio::select! {
                task = &mut waiter => break task?,
                event = events.recv() => {
                    if let Ok(TaskEvent::AttemptRecorded { task_id: id, attempt }) = event
                        && id == task_id
                        && let Some(bar) = &bar
                    {
                        bar.inc(1);
                        let result = if attempt.is_success() { "published" } else { "failed" };
                        bar.set_message(format!("{} {}", attempt.destination_id, result));
                    }
                }
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    warn!(task_id = %task_id, "Interrupted, cancelling task");
                    if let Err(e) = orchestrator.cancel(&task_id).await {
                        debug!("Cancel ignored: {}", e);
                    }
                }
            }
        };

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        print!("{}", self.output.format_task(&task)?);
        finished(&task)
    }

    fn progress_bar(&self, args: &RunArgs) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let bar = ProgressBar::new(args.destinations.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Some(bar)
    }

    async fn wait_for_schedule(&self, schedule_id: &str) -> Result<String> {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SCHEDULE_POLL_INTERVAL) => {}
                _ = tokio::signal::ctrl_c() => {
                    if let Err(e) = self.container.scheduler.cancel(schedule_id) {
                        debug!("Cancel ignored: {}", e);
                    }
                }
            }
            let Some(entry) = self.container.scheduler.get(schedule_id) else {
                return Err(CliError::ScheduleAborted(
                    schedule_id.to_string(),
                    "entry disappeared".to_string(),
                ));
            };
            match entry.state {
                ScheduleState::Waiting | ScheduleState::Firing => continue,
                ScheduleState::Fired { task_id } => return Ok(task_id),
                ScheduleState::Cancelled => {
                    return Err(CliError::ScheduleAborted(
                        schedule_id.to_string(),
                        "cancelled".to_string(),
                    ));
                }
                ScheduleState::Failed { error } => {
                    return Err(CliError::ScheduleAborted(schedule_id.to_string(), error));
                }
            }
        }
    }

    pub async fn destinations(&self) -> Result<()> {
        let windows = self.container.orchestrator.limiter().windows(Utc::now()).await?;
        let views: Vec<DestinationView<'_>> = self
            .container
            .catalog
            .iter()
            .filter_map(|destination| {
                windows
                    .iter()
                    .find(|w| w.destination_id == destination.id)
                    .map(|window| DestinationView {
                        destination,
                        window,
                    })
            })
            .collect();
        print!("{}", self.output.format_destinations(&views)?);
        Ok(())
    }

    pub async fn history(
        &self,
        destination: Option<String>,
        since_hours: Option<i64>,
        successes: bool,
        limit: usize,
    ) -> Result<()> {
        let mut filter = HistoryFilter::new().limit(limit);
        if let Some(destination) = destination {
            filter = filter.destination(destination);
        }
        if let Some(hours) = since_hours {
            if hours <= 0 {
                return Err(CliError::InvalidInput(
                    "--since-hours must be positive".to_string(),
                ));
            }
            filter = filter.since(Utc::now() - ChronoDuration::hours(hours));
        }
        if successes {
            filter = filter.successes();
        }

        let records = self.container.history.list(&filter).await?;
        print!("{}", self.output.format_history(&records)?);
        Ok(())
    }

    pub async fn stats(&self, destination: Option<String>) -> Result<()> {
        let stats = match destination {
            Some(destination) => {
                self.container
                    .history
                    .stats_for(&HistoryFilter::new().destination(destination))
                    .await?
            }
            None => self.container.history.stats().await?,
        };
        print!("{}", self.output.format_stats(&stats)?);
        Ok(())
    }

    pub async fn tasks(&self, status: Option<String>) -> Result<()> {
        let status = match status {
            Some(raw) => Some(TaskStatus::parse(&raw.to_ascii_uppercase()).ok_or_else(|| {
                CliError::InvalidInput(format!("unknown task status '{raw}'"))
            })?),
            None => None,
        };
        let tasks = self.container.orchestrator.list_tasks(status).await?;
        print!("{}", self.output.format_tasks(&tasks)?);
        Ok(())
    }

    pub async fn task(&self, id: &str) -> Result<()> {
        let task = self.container.orchestrator.get_task(id).await?;
        print!("{}", self.output.format_task(&task)?);
        Ok(())
    }

    pub async fn clear_history(&self, yes: bool) -> Result<()> {
        if !yes {
            return Err(CliError::InvalidInput(
                "clearing the history resets every quota window, pass --yes to confirm"
                    .to_string(),
            ));
        }
        let removed = self.container.history.clear().await?;
        if self.format == OutputFormat::Json {
            println!("{}", serde_json::json!({ "removed": removed }));
        } else {
            println!("Removed {removed} history record(s)");
        }
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.container.shutdown().await?;
        Ok(())
    }
}

/// Map a terminal task to the process result.
fn finished(task: &ReuploadTask) -> Result<()> {
    match task.status {
        TaskStatus::Completed => Ok(()),
        status => Err(CliError::TaskUnsuccessful {
            task_id: task.id.clone(),
            status,
        }),
    }
}
