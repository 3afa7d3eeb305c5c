//! Domain value objects.
//!
//! Value objects are immutable objects that represent concepts in the domain
//! and are defined by their attributes rather than identity.

mod metadata;
mod retry_policy;
mod settings;

pub use metadata::{Privacy, PublishMetadata};
pub use retry_policy::RetryPolicy;
pub use settings::{CropRect, Resolution, ReuploadSettings};
