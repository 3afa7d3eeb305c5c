//! Media pipeline.
//!
//! Turns a source asset into a publishable artifact by running the enabled
//! steps (crop, then resize, then watermark) through a [`MediaTransformer`].
//! With nothing enabled the source bytes pass through and the transformer is
//! never called.

mod ffmpeg;
mod ops;
mod transformer;

pub use ffmpeg::FfmpegTransformer;
pub use ops::{TransformOp, WATERMARK_MARGIN_PX, WatermarkAnchor};
pub use transformer::{MediaTransformer, TransformedArtifact};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{ReuploadSettings, VideoAsset};

/// Failure of the media step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("transform step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("invalid transform settings: {0}")]
    InvalidSettings(String),
}

impl TransformError {
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step, .. } => Some(step),
            Self::InvalidSettings(_) => None,
        }
    }
}

/// Runs transform steps in their fixed order.
#[derive(Clone)]
pub struct MediaPipeline {
    transformer: Arc<dyn MediaTransformer>,
    step_timeout: Option<Duration>,
}

impl MediaPipeline {
    pub fn new(transformer: Arc<dyn MediaTransformer>) -> Self {
        Self {
            transformer,
            step_timeout: None,
        }
    }

    /// Fail a step that runs longer than `timeout`.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Produce the artifact for `asset`.
    ///
    /// `progress` receives a 0-100 value after every completed step.
    pub async fn transform(
        &self,
        asset: &VideoAsset,
        settings: &ReuploadSettings,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<TransformedArtifact, TransformError> {
        let ops = TransformOp::plan(settings)
            .map_err(|e| TransformError::InvalidSettings(e.to_string()))?;
        let mut artifact = TransformedArtifact::from_asset(asset);

        if ops.is_empty() {
            debug!(video_id = %asset.id, "No transform steps enabled, passing source through");
            progress(100);
            return Ok(artifact);
        }

        let total = ops.len();
        for (idx, op) in ops.iter().enumerate() {
            let step = op.name();
            debug!(video_id = %asset.id, step, transformer = self.transformer.name(), "Applying transform step");

            let result = match self.step_timeout {
                Some(timeout) => {
                    match tokio::time::timeout(timeout, self.transformer.apply(op, artifact)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(format!("timed out after {}s", timeout.as_secs_f64())),
                    }
                }
                None => self.transformer.apply(op, artifact).await,
            };

            artifact = result.map_err(|reason| {
                warn!(video_id = %asset.id, step, %reason, "Transform step failed");
                TransformError::StepFailed {
                    step: step.to_string(),
                    reason,
                }
            })?;

            progress(((idx + 1) * 100 / total) as u8);
        }

        info!(
            video_id = %asset.id,
            steps = ?artifact.applied,
            size = artifact.size_bytes(),
            "Media transform complete"
        );
        Ok(artifact)
    }
}
