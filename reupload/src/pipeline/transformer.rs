//! Media transformer trait and the artifact it produces.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use super::ops::TransformOp;
use crate::domain::VideoAsset;

/// Video contents ready for publishing.
#[derive(Clone, PartialEq)]
pub struct TransformedArtifact {
    pub source_video_id: String,
    /// File name used when publishing, derived from the source name.
    pub file_name: String,
    pub data: Bytes,
    /// Container format, lowercase extension.
    pub format: String,
    /// Names of the steps applied, in order.
    pub applied: Vec<String>,
}

impl fmt::Debug for TransformedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformedArtifact")
            .field("source_video_id", &self.source_video_id)
            .field("file_name", &self.file_name)
            .field("size_bytes", &self.size_bytes())
            .field("format", &self.format)
            .field("applied", &self.applied)
            .finish()
    }
}

impl TransformedArtifact {
    /// Untouched copy of the source asset.
    pub fn from_asset(asset: &VideoAsset) -> Self {
        Self {
            source_video_id: asset.id.clone(),
            file_name: asset.name.clone(),
            data: asset.data.clone(),
            format: asset.format.clone(),
            applied: Vec::new(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_identity(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Executes a single transform step.
///
/// Implementations return the new artifact or a human-readable reason. The
/// pipeline owns ordering, progress and error wrapping.
#[async_trait]
pub trait MediaTransformer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(
        &self,
        op: &TransformOp,
        artifact: TransformedArtifact,
    ) -> std::result::Result<TransformedArtifact, String>;
}
