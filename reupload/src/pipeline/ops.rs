//! Media transform operations.

use serde::{Deserialize, Serialize};

use crate::domain::{CropRect, Resolution, ReuploadSettings};
use crate::Result;

/// Margin between the watermark and the frame edges, in pixels.
pub const WATERMARK_MARGIN_PX: u32 = 20;

/// Corner the watermark is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkAnchor {
    #[default]
    BottomRight,
}

/// One step of the media pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    Crop {
        rect: CropRect,
    },
    Resize {
        resolution: Resolution,
    },
    Watermark {
        text: String,
        anchor: WatermarkAnchor,
        margin_px: u32,
    },
}

impl TransformOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Crop { .. } => "crop",
            Self::Resize { .. } => "resize",
            Self::Watermark { .. } => "watermark",
        }
    }

    /// Enabled steps in execution order: crop, resize, watermark.
    pub fn plan(settings: &ReuploadSettings) -> Result<Vec<TransformOp>> {
        let mut ops = Vec::with_capacity(3);
        if settings.crop {
            ops.push(Self::Crop {
                rect: settings.crop_rect,
            });
        }
        if settings.resize {
            ops.push(Self::Resize {
                resolution: settings.target_resolution()?,
            });
        }
        if settings.watermark {
            ops.push(Self::Watermark {
                text: settings.watermark_text.clone(),
                anchor: WatermarkAnchor::BottomRight,
                margin_px: WATERMARK_MARGIN_PX,
            });
        }
        Ok(ops)
    }
}
