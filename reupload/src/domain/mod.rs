//! Domain layer: videos, destinations, tasks and their value objects.

mod destination;
mod task;
mod video;
pub mod value_objects;

pub use destination::{DestinationCatalog, DestinationConfig, RateLimitPolicy};
pub use task::{
    AttemptOutcome, AttemptState, Engagement, FailureCode, PublishAttempt, ReuploadTask,
    TaskStatus,
};
pub use value_objects::{CropRect, Privacy, PublishMetadata, Resolution, RetryPolicy, ReuploadSettings};
pub use video::{VideoAsset, VideoLibrary, VideoStatus, VideoSummary};
pub(crate) use video::format_from_name;
