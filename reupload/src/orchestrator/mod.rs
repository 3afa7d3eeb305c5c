//! Reupload task orchestration.
//!
//! A task runs the media step once, then publishes to each destination in
//! submission order. Every resolved destination is appended to the history
//! log right away, which is what the rate limiter counts.

mod events;
mod request;
mod service;

pub use events::TaskEvent;
pub use request::ReuploadRequest;
pub use service::{OrchestratorConfig, TaskOrchestrator};
