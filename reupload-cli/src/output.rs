use crate::{cli::OutputFormat, error::Result};
#[cfg(feature = "colored-output")]
use colored::*;
use serde::Serialize;
#[cfg(feature = "table-output")]
use tabled::{Table, Tabled, settings::Style};

use reupload::domain::{AttemptOutcome, DestinationConfig, ReuploadTask, TaskStatus};
use reupload::history::{HistoryRecord, UploadStats};
use reupload::rate_limit::RateWindowCounter;
use reupload::scheduler::ScheduledReupload;

/// A destination with its quota usage.
#[derive(Debug, Serialize)]
pub struct DestinationView<'a> {
    #[serde(flatten)]
    pub destination: &'a DestinationConfig,
    pub window: &'a RateWindowCounter,
}

pub struct OutputManager {
    colored: bool,
    format: OutputFormat,
}

impl OutputManager {
    pub fn new(colored: bool, format: OutputFormat) -> Self {
        Self { colored, format }
    }

    fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string_pretty(value)?)
    }

    pub fn format_task(&self, task: &ReuploadTask) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.json(task),
            OutputFormat::Table => self.format_attempts_table(task),
            OutputFormat::Pretty => Ok(self.format_task_pretty(task)),
        }
    }

    fn format_task_pretty(&self, task: &ReuploadTask) -> String {
        let mut output = String::new();
        output.push_str(&self.colorize("Task:", &Color::Green, true));
        output.push_str(&format!(" {}\n", task.id));
        output.push_str(&format!(
            "  {}: {}\n",
            self.colorize("Video", &Color::Yellow, false),
            task.video_name
        ));
        output.push_str(&format!(
            "  {}: {}\n",
            self.colorize("Status", &Color::Yellow, false),
            self.status(task.status)
        ));
        output.push_str(&format!(
            "  {}: {}%\n",
            self.colorize("Progress", &Color::Yellow, false),
            task.progress
        ));
        output.push_str(&format!(
            "  {}: {}\n",
            self.colorize("Created", &Color::Yellow, false),
            task.created_at.to_rfc3339()
        ));
        if let Some(error) = &task.error {
            output.push_str(&format!(
                "  {}: {}\n",
                self.colorize("Error", &Color::Yellow, false),
                error
            ));
        }

        output.push_str(&format!(
            "  {}:\n",
            self.colorize("Destinations", &Color::Yellow, false)
        ));
        for destination in &task.destinations {
            let attempt = task.attempts.iter().find(|a| &a.destination_id == destination);
            let line = match attempt.map(|a| (&a.outcome, a.retries_used)) {
                Some((AttemptOutcome::Success { url, .. }, retries)) => format!(
                    "{} {} (retries: {})",
                    self.colorize("published", &Color::Green, false),
                    self.colorize(url, &Color::Blue, false),
                    retries
                ),
                Some((AttemptOutcome::Failure { code, message }, retries)) => format!(
                    "{} {}: {} (retries: {})",
                    self.colorize("failed", &Color::Red, false),
                    code,
                    message,
                    retries
                ),
                None => self.colorize("not attempted", &Color::Cyan, false),
            };
            output.push_str(&format!("    {destination}: {line}\n"));
        }
        output
    }

    pub fn format_tasks(&self, tasks: &[ReuploadTask]) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.json(tasks),
            #[cfg(feature = "table-output")]
            OutputFormat::Table => {
                #[derive(Tabled)]
                struct Row {
                    id: String,
                    video: String,
                    status: String,
                    progress: String,
                    destinations: String,
                    created: String,
                }
                let rows: Vec<Row> = tasks
                    .iter()
                    .map(|t| Row {
                        id: t.id.clone(),
                        video: t.video_name.clone(),
                        status: t.status.to_string(),
                        progress: format!("{}%", t.progress),
                        destinations: t.destinations.join(","),
                        created: t.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    })
                    .collect();
                Ok(Table::new(rows).with(Style::modern()).to_string())
            }
            #[cfg(not(feature = "table-output"))]
            OutputFormat::Table => Ok(self.format_tasks_pretty(tasks)),
            OutputFormat::Pretty => Ok(self.format_tasks_pretty(tasks)),
        }
    }

    fn format_tasks_pretty(&self, tasks: &[ReuploadTask]) -> String {
        if tasks.is_empty() {
            return "No tasks.\n".to_string();
        }
        let mut output = String::new();
        for task in tasks {
            output.push_str(&format!(
                "{}  {}  {}  [{}]\n",
                task.id,
                self.status(task.status),
                task.video_name,
                task.destinations.join(", ")
            ));
        }
        output
    }

    #[cfg(feature = "table-output")]
    fn format_attempts_table(&self, task: &ReuploadTask) -> Result<String> {
        #[derive(Tabled)]
        struct Row {
            destination: String,
            result: String,
            retries: u32,
            detail: String,
        }
        let rows: Vec<Row> = task
            .attempts
            .iter()
            .map(|a| {
                let (result, detail) = match &a.outcome {
                    AttemptOutcome::Success { url, .. } => ("SUCCESS".to_string(), url.clone()),
                    AttemptOutcome::Failure { code, message } => {
                        (code.to_string(), message.clone())
                    }
                };
                Row {
                    destination: a.destination_id.clone(),
                    result,
                    retries: a.retries_used,
                    detail,
                }
            })
            .collect();
        Ok(format!(
            "Task {} ({})\n{}",
            task.id,
            task.status,
            Table::new(rows).with(Style::modern())
        ))
    }

    #[cfg(not(feature = "table-output"))]
    fn format_attempts_table(&self, task: &ReuploadTask) -> Result<String> {
        Ok(self.format_task_pretty(task))
    }

    pub fn format_history(&self, records: &[HistoryRecord]) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.json(records),
            #[cfg(feature = "table-output")]
            OutputFormat::Table => {
                #[derive(Tabled)]
                struct Row {
                    time: String,
                    destination: String,
                    video: String,
                    result: String,
                    views: u64,
                }
                let rows: Vec<Row> = records
                    .iter()
                    .map(|r| Row {
                        time: r.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        destination: r.destination_id.clone(),
                        video: r.video_name.clone(),
                        result: r
                            .failure_code()
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "SUCCESS".to_string()),
                        views: r.engagement().views,
                    })
                    .collect();
                Ok(Table::new(rows).with(Style::modern()).to_string())
            }
            #[cfg(not(feature = "table-output"))]
            OutputFormat::Table => Ok(self.format_history_pretty(records)),
            OutputFormat::Pretty => Ok(self.format_history_pretty(records)),
        }
    }

    fn format_history_pretty(&self, records: &[HistoryRecord]) -> String {
        if records.is_empty() {
            return "No publish history.\n".to_string();
        }
        let mut output = String::new();
        for record in records {
            let result = match &record.outcome {
                AttemptOutcome::Success { url, .. } => self.colorize(url, &Color::Blue, false),
                AttemptOutcome::Failure { code, message } => {
                    self.colorize(&format!("{code}: {message}"), &Color::Red, false)
                }
            };
            output.push_str(&format!(
                "{}  {:<10} {}  {}\n",
                record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                record.destination_id,
                record.video_name,
                result
            ));
        }
        output
    }

    pub fn format_stats(&self, stats: &UploadStats) -> Result<String> {
        if self.format == OutputFormat::Json {
            return self.json(stats);
        }

        let mut output = String::new();
        output.push_str(&self.colorize("Upload statistics:", &Color::Green, true));
        output.push('\n');
        for (label, value) in [
            ("Total uploads", stats.total_uploads.to_string()),
            ("Successful", stats.successful_uploads.to_string()),
            ("Failed", stats.failed_uploads.to_string()),
            ("Success rate", format!("{:.1}%", stats.success_rate)),
            ("Total views", stats.total_views.to_string()),
            ("Total likes", stats.total_likes.to_string()),
            ("Average views", format!("{:.1}", stats.average_views)),
        ] {
            output.push_str(&format!(
                "  {}: {}\n",
                self.colorize(label, &Color::Yellow, false),
                self.colorize(&value, &Color::Cyan, false)
            ));
        }
        if !stats.by_destination.is_empty() {
            output.push_str(&self.colorize("By destination:", &Color::Green, true));
            output.push('\n');
            for (destination, s) in &stats.by_destination {
                output.push_str(&format!(
                    "  {}: {} ok / {} failed, {} views\n",
                    self.colorize(destination, &Color::Yellow, false),
                    s.successful_uploads,
                    s.failed_uploads,
                    s.total_views
                ));
            }
        }
        Ok(output)
    }

    pub fn format_destinations(&self, views: &[DestinationView<'_>]) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.json(views),
            #[cfg(feature = "table-output")]
            OutputFormat::Table => {
                #[derive(Tabled)]
                struct Row {
                    id: String,
                    name: String,
                    formats: String,
                    max_size_mb: String,
                    today: String,
                    this_hour: String,
                }
                let rows: Vec<Row> = views
                    .iter()
                    .map(|v| Row {
                        id: v.destination.id.clone(),
                        name: v.destination.name.clone(),
                        formats: v.destination.supported_formats.join(","),
                        max_size_mb: size_mb(v.destination.max_size_bytes),
                        today: quota(v.window.daily_used, v.window.policy.map(|p| p.daily)),
                        this_hour: quota(v.window.hourly_used, v.window.policy.map(|p| p.hourly)),
                    })
                    .collect();
                Ok(Table::new(rows).with(Style::modern()).to_string())
            }
            #[cfg(not(feature = "table-output"))]
            OutputFormat::Table => Ok(self.format_destinations_pretty(views)),
            OutputFormat::Pretty => Ok(self.format_destinations_pretty(views)),
        }
    }

    fn format_destinations_pretty(&self, views: &[DestinationView<'_>]) -> String {
        let mut output = String::new();
        for view in views {
            let d = view.destination;
            output.push_str(&format!(
                "{} ({})\n",
                self.colorize(&d.name, &Color::Green, true),
                d.id
            ));
            output.push_str(&format!(
                "  {}: {}\n",
                self.colorize("Formats", &Color::Yellow, false),
                d.supported_formats.join(", ")
            ));
            output.push_str(&format!(
                "  {}: {} MB\n",
                self.colorize("Max size", &Color::Yellow, false),
                size_mb(d.max_size_bytes)
            ));
            if !d.required_fields.is_empty() {
                output.push_str(&format!(
                    "  {}: {}\n",
                    self.colorize("Required", &Color::Yellow, false),
                    d.required_fields.join(", ")
                ));
            }
            output.push_str(&format!(
                "  {}: today {}, this hour {}\n",
                self.colorize("Quota", &Color::Yellow, false),
                quota(view.window.daily_used, view.window.policy.map(|p| p.daily)),
                quota(view.window.hourly_used, view.window.policy.map(|p| p.hourly))
            ));
        }
        output
    }

    pub fn format_scheduled(&self, entry: &ScheduledReupload) -> Result<String> {
        if self.format == OutputFormat::Json {
            return self.json(entry);
        }
        Ok(format!(
            "{} {} for {} to {}\n",
            self.colorize("Scheduled", &Color::Green, true),
            entry.id,
            entry.run_at.to_rfc3339(),
            entry.destinations.join(", ")
        ))
    }

    fn status(&self, status: TaskStatus) -> String {
        let color = match status {
            TaskStatus::Completed => Color::Green,
            TaskStatus::Failed => Color::Red,
            TaskStatus::Cancelled => Color::Yellow,
            TaskStatus::Pending | TaskStatus::Running => Color::Cyan,
        };
        self.colorize(status.as_str(), &color, true)
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                    Color::Red => text.red(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (color, bold, self.colored);
            text.to_string()
        }
    }
}

fn quota(used: u32, limit: Option<u32>) -> String {
    match limit {
        Some(limit) => format!("{used}/{limit}"),
        None => format!("{used}/unlimited"),
    }
}

fn size_mb(bytes: u64) -> String {
    if bytes == u64::MAX {
        "unlimited".to_string()
    } else {
        (bytes / (1024 * 1024)).to_string()
    }
}

enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
    Red,
}
