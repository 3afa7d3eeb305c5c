use reupload::domain::TaskStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Reupload(#[from] reupload::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Task {task_id} finished as {status}")]
    TaskUnsuccessful { task_id: String, status: TaskStatus },

    #[error("Scheduled reupload {0} did not run: {1}")]
    ScheduleAborted(String, String),
}

pub type Result<T> = std::result::Result<T, CliError>;
