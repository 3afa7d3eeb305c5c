//! Destination publishers.
//!
//! Adding a destination takes one [`Publisher`] implementation and one
//! destination config entry.

mod platforms;
mod registry;
mod traits;
mod validate;

pub use platforms::{InstagramPublisher, SimulationConfig, TikTokPublisher, YouTubePublisher};
pub use registry::PublisherRegistry;
pub use traits::{PublishError, PublishOutcome, Publisher};
pub use validate::validate_artifact;
