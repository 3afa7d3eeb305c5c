//! Reupload request.

use serde::{Deserialize, Serialize};

use crate::domain::{PublishMetadata, ReuploadSettings};

/// Ask to publish one ingested video to an ordered set of destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReuploadRequest {
    pub video_id: String,
    /// Destination ids, in publishing order.
    pub destinations: Vec<String>,
    /// Defaults to metadata titled after the video file name.
    #[serde(default)]
    pub metadata: Option<PublishMetadata>,
    #[serde(default)]
    pub settings: ReuploadSettings,
}

impl ReuploadRequest {
    pub fn new<I, S>(video_id: impl Into<String>, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            video_id: video_id.into(),
            destinations: destinations.into_iter().map(Into::into).collect(),
            metadata: None,
            settings: ReuploadSettings::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: PublishMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_settings(mut self, settings: ReuploadSettings) -> Self {
        self.settings = settings;
        self
    }
}
