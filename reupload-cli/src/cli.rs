use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use reupload::domain::{CropRect, Privacy, PublishMetadata, ReuploadSettings};

#[derive(Parser, Debug)]
#[command(
    name = "reupload",
    version,
    about = "Publish one video to several platforms with per-platform quotas",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "REUPLOAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the database URL
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable
    Pretty,
    /// Pretty-printed JSON
    Json,
    /// Tables
    Table,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish a video file to one or more destinations
    Run(RunArgs),

    /// List destinations and their current quota usage
    Destinations,

    /// Show the publish history
    History {
        /// Only this destination
        #[arg(long)]
        destination: Option<String>,

        /// Only the last N hours
        #[arg(long)]
        since_hours: Option<i64>,

        /// Only successful publishes
        #[arg(long)]
        successes: bool,

        /// Maximum number of records
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Aggregate statistics over the publish history
    Stats {
        /// Only this destination
        #[arg(long)]
        destination: Option<String>,
    },

    /// List reupload tasks
    Tasks {
        /// Filter by status (PENDING, RUNNING, COMPLETED, FAILED, CANCELLED)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one task with its attempts
    Task { id: String },

    /// Delete the whole publish history
    ClearHistory {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Print the effective configuration
    Config,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Video file to publish
    pub file: PathBuf,

    /// Destinations, in publishing order
    #[arg(short = 't', long = "to", value_delimiter = ',', required = true)]
    pub destinations: Vec<String>,

    /// Title (defaults to the file name without extension)
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// Comma separated tags
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    #[arg(long)]
    pub category: Option<String>,

    /// public, private or unlisted
    #[arg(long)]
    pub privacy: Option<Privacy>,

    /// Crop rectangle as x,y,w,h with an optional @start_secs
    #[arg(long)]
    pub crop: Option<CropRect>,

    /// Resize to WxH
    #[arg(long)]
    pub resize: Option<String>,

    /// Burn this text into the bottom-right corner
    #[arg(long)]
    pub watermark: Option<String>,

    /// Retries per destination
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Fail each destination on its first error
    #[arg(long, conflicts_with = "max_retries")]
    pub no_retry: bool,

    /// Start at this instant (RFC 3339)
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

impl RunArgs {
    /// Settings for this run, starting from the configured defaults.
    pub fn settings(&self, defaults: &ReuploadSettings) -> ReuploadSettings {
        let mut settings = defaults.clone();
        if let Some(crop) = self.crop {
            settings = settings.with_crop(crop);
        }
        if let Some(resolution) = &self.resize {
            settings = settings.with_resize(resolution.clone());
        }
        if let Some(text) = &self.watermark {
            settings = settings.with_watermark(text.clone());
        }
        if let Some(max_retries) = self.max_retries {
            settings.retry.max_retries = max_retries;
        }
        if self.no_retry {
            settings.retry_failed = false;
        }
        if let Some(at) = self.at {
            settings = settings.with_schedule_at(at);
        }
        settings
    }

    pub fn metadata(&self, file_name: &str) -> PublishMetadata {
        let mut metadata = match &self.title {
            Some(title) => PublishMetadata::new(title.clone()),
            None => PublishMetadata::for_file_name(file_name),
        };
        if let Some(description) = &self.description {
            metadata = metadata.with_description(description.clone());
        }
        if !self.tags.is_empty() {
            metadata = metadata.with_tags(self.tags.iter().map(|t| t.trim().to_string()));
        }
        if let Some(category) = &self.category {
            metadata = metadata.with_category(category.clone());
        }
        if let Some(privacy) = self.privacy {
            metadata = metadata.with_privacy(privacy);
        }
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["reupload", "run"];
        full.extend_from_slice(argv);
        match Args::try_parse_from(full).unwrap().command {
            Commands::Run(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_run_args_parse() {
        let args = run_args(&[
            "clip.mp4",
            "--to",
            "tiktok,youtube",
            "--tags",
            "a, b",
            "--crop",
            "0,0,720,1280@1.5",
            "--privacy",
            "unlisted",
            "--max-retries",
            "1",
        ]);
        assert_eq!(args.destinations, vec!["tiktok", "youtube"]);

        let settings = args.settings(&ReuploadSettings::default());
        assert!(settings.crop);
        assert_eq!(settings.crop_rect.start_offset_secs, 1.5);
        assert_eq!(settings.retry.max_retries, 1);
        assert!(settings.retry_failed);

        let metadata = args.metadata("clip.mp4");
        assert_eq!(metadata.title, "clip");
        assert_eq!(metadata.tags, vec!["a", "b"]);
        assert_eq!(metadata.privacy, Privacy::Unlisted);
    }

    #[test]
    fn test_run_requires_destination() {
        assert!(Args::try_parse_from(["reupload", "run", "clip.mp4"]).is_err());
    }

    #[test]
    fn test_bad_crop_rejected_by_parser() {
        assert!(
            Args::try_parse_from(["reupload", "run", "clip.mp4", "--to", "tiktok", "--crop", "1,2"])
                .is_err()
        );
    }

    #[test]
    fn test_no_retry_and_schedule() {
        let args = run_args(&[
            "clip.mp4",
            "-t",
            "instagram",
            "--no-retry",
            "--at",
            "2030-01-01T10:00:00Z",
        ]);
        let settings = args.settings(&ReuploadSettings::default());
        assert!(!settings.retry_failed);
        assert_eq!(settings.schedule_at, Some("2030-01-01T10:00:00Z".parse().unwrap()));
    }

    #[test]
    fn test_global_flags() {
        let args = Args::try_parse_from(["reupload", "history", "--successes", "-o", "json"]).unwrap();
        assert_eq!(args.output, OutputFormat::Json);
        assert!(matches!(args.command, Commands::History { successes: true, .. }));
    }
}
