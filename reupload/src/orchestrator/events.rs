//! Task lifecycle events.

use serde::Serialize;

use crate::domain::{PublishAttempt, TaskStatus};

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Task accepted and queued.
    Submitted {
        task_id: String,
        video_id: String,
        destinations: Vec<String>,
    },
    /// Task picked up by a worker.
    Started { task_id: String },
    /// One destination resolved.
    AttemptRecorded {
        task_id: String,
        attempt: PublishAttempt,
    },
    /// Task reached a terminal status.
    Finished {
        task_id: String,
        status: TaskStatus,
        error: Option<String>,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Submitted { task_id, .. }
            | Self::Started { task_id }
            | Self::AttemptRecorded { task_id, .. }
            | Self::Finished { task_id, .. } => task_id,
        }
    }
}
