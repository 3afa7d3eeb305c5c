//! Ingested video assets.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

use super::value_objects::Resolution;
use crate::{Error, Result};

/// Processing status of a video asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A locally ingested source video.
#[derive(Clone)]
pub struct VideoAsset {
    pub id: String,
    /// Display name, usually the original file name.
    pub name: String,
    /// Raw file contents.
    pub data: Bytes,
    pub size_bytes: u64,
    pub duration_secs: Option<f64>,
    /// Container format, lowercase file extension.
    pub format: String,
    pub resolution: Option<Resolution>,
    /// Platform the video came from, `local` for file-picker ingestion.
    pub source_platform: String,
    pub status: VideoStatus,
    pub progress: u8,
    pub ingested_at: DateTime<Utc>,
}

impl fmt::Debug for VideoAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoAsset")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size_bytes", &self.size_bytes)
            .field("format", &self.format)
            .field("status", &self.status)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl VideoAsset {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            format: format_from_name(&name),
            size_bytes: data.len() as u64,
            name,
            data,
            duration_secs: None,
            resolution: None,
            source_platform: "local".to_string(),
            status: VideoStatus::Pending,
            progress: 0,
            ingested_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_source_platform(mut self, platform: impl Into<String>) -> Self {
        self.source_platform = platform.into();
        self
    }

    pub fn summary(&self) -> VideoSummary {
        VideoSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            size_bytes: self.size_bytes,
            format: self.format.clone(),
            source_platform: self.source_platform.clone(),
            status: self.status,
            progress: self.progress,
        }
    }
}

/// Lowercase extension of a file name, empty when there is none.
pub(crate) fn format_from_name(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Serializable view of a video asset without its contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSummary {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub format: String,
    pub source_platform: String,
    pub status: VideoStatus,
    pub progress: u8,
}

/// In-memory registry of ingested videos.
///
/// Tasks hold a reference count on the asset they process; referenced assets
/// cannot be removed.
#[derive(Default)]
pub struct VideoLibrary {
    assets: DashMap<String, VideoAsset>,
    references: DashMap<String, usize>,
}

impl VideoLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register in-memory contents as a new asset.
    pub fn ingest(&self, name: impl Into<String>, data: impl Into<Bytes>) -> VideoAsset {
        self.insert(VideoAsset::new(name, data))
    }

    /// Read a file from disk and register it.
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<VideoAsset> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::validation(format!("invalid file name: {}", path.display())))?
            .to_string();
        Ok(self.ingest(name, data))
    }

    /// Register a prepared asset, returning a copy of it.
    pub fn insert(&self, asset: VideoAsset) -> VideoAsset {
        debug!(video_id = %asset.id, name = %asset.name, size = asset.size_bytes, "Video ingested");
        self.assets.insert(asset.id.clone(), asset.clone());
        asset
    }

    pub fn get(&self, id: &str) -> Option<VideoAsset> {
        self.assets.get(id).map(|a| a.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.assets.contains_key(id)
    }

    pub fn list(&self) -> Vec<VideoSummary> {
        let mut list: Vec<VideoSummary> = self.assets.iter().map(|a| a.summary()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn set_status(&self, id: &str, status: VideoStatus) {
        if let Some(mut asset) = self.assets.get_mut(id) {
            asset.status = status;
            if status == VideoStatus::Completed {
                asset.progress = 100;
            }
        }
    }

    pub fn set_progress(&self, id: &str, progress: u8) {
        if let Some(mut asset) = self.assets.get_mut(id) {
            asset.progress = progress.min(100);
        }
    }

    pub(crate) fn retain(&self, id: &str) {
        *self.references.entry(id.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn release(&self, id: &str) {
        let remove = match self.references.get_mut(id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if remove {
            self.references.remove_if(id, |_, count| *count == 0);
        }
    }

    pub fn is_referenced(&self, id: &str) -> bool {
        self.references.get(id).is_some_and(|c| *c > 0)
    }

    /// Remove an asset that no pending or running task references.
    pub fn remove(&self, id: &str) -> Result<()> {
        if self.is_referenced(id) {
            return Err(Error::validation(format!(
                "video {id} is referenced by an unfinished task"
            )));
        }
        self.assets
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("Video", id))
    }
}
