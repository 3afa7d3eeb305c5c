//! Reupload settings snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::RetryPolicy;
use crate::{Error, Result};

/// Target frame size, written as `WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::validation(format!("invalid resolution '{s}', expected WxH"));
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

/// Crop rectangle plus an optional start offset into the source.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CropRect {
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Seconds skipped from the start of the source.
    #[serde(default)]
    pub start_offset_secs: f64,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            start_offset_secs: 0.0,
        }
    }

    pub fn with_start_offset(mut self, secs: f64) -> Self {
        self.start_offset_secs = secs;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::validation(
                "crop rectangle must have a non-zero width and height",
            ));
        }
        if !self.start_offset_secs.is_finite() || self.start_offset_secs < 0.0 {
            return Err(Error::validation("crop start offset must be >= 0 seconds"));
        }
        Ok(())
    }
}

/// Parses `x,y,w,h` with an optional `@start_secs` suffix.
impl FromStr for CropRect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::validation(format!("invalid crop '{s}', expected x,y,w,h[@start]"));
        let (rect, start) = match s.split_once('@') {
            Some((rect, start)) => (rect, Some(start)),
            None => (s, None),
        };

        let parts = rect
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        let &[x, y, width, height] = &parts[..] else {
            return Err(invalid());
        };

        let start_offset_secs = match start {
            Some(start) => start.trim().parse::<f64>().map_err(|_| invalid())?,
            None => 0.0,
        };

        let crop = Self {
            x,
            y,
            width,
            height,
            start_offset_secs,
        };
        crop.validate()?;
        Ok(crop)
    }
}

/// Every option a reupload request recognizes.
///
/// A copy is stored on each task at submission time, so later changes to the
/// defaults never affect tasks already in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReuploadSettings {
    /// Enable the crop step.
    #[serde(default)]
    pub crop: bool,
    /// Rectangle used by the crop step.
    #[serde(default)]
    pub crop_rect: CropRect,
    /// Enable the resize step.
    #[serde(default)]
    pub resize: bool,
    /// Target resolution for the resize step (`WxH`).
    #[serde(default = "default_target_resolution")]
    pub target_resolution: String,
    /// Enable the watermark step.
    #[serde(default)]
    pub watermark: bool,
    /// Text drawn by the watermark step, bottom-right anchored.
    #[serde(default)]
    pub watermark_text: String,
    /// When false, failures are never retried regardless of `retry.max_retries`.
    #[serde(default = "default_true")]
    pub retry_failed: bool,
    /// Retry budget and backoff.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Deferred execution instant; `None` runs immediately.
    #[serde(default)]
    pub schedule_at: Option<DateTime<Utc>>,
}

fn default_target_resolution() -> String {
    "1080x1920".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ReuploadSettings {
    fn default() -> Self {
        Self {
            crop: false,
            crop_rect: CropRect::default(),
            resize: false,
            target_resolution: default_target_resolution(),
            watermark: false,
            watermark_text: String::new(),
            retry_failed: true,
            retry: RetryPolicy::default(),
            schedule_at: None,
        }
    }
}

impl ReuploadSettings {
    pub fn with_crop(mut self, rect: CropRect) -> Self {
        self.crop = true;
        self.crop_rect = rect;
        self
    }

    pub fn with_resize(mut self, resolution: impl Into<String>) -> Self {
        self.resize = true;
        self.target_resolution = resolution.into();
        self
    }

    pub fn with_watermark(mut self, text: impl Into<String>) -> Self {
        self.watermark = true;
        self.watermark_text = text.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_schedule_at(mut self, at: DateTime<Utc>) -> Self {
        self.schedule_at = Some(at);
        self
    }

    /// Whether any media step is enabled.
    pub fn has_transforms(&self) -> bool {
        self.crop || self.resize || self.watermark
    }

    /// Parsed resize target.
    pub fn target_resolution(&self) -> Result<Resolution> {
        self.target_resolution.parse()
    }

    /// Retry policy after applying `retry_failed`.
    pub fn effective_retry(&self) -> RetryPolicy {
        if self.retry_failed {
            self.retry.clone()
        } else {
            RetryPolicy {
                max_retries: 0,
                ..self.retry.clone()
            }
        }
    }

    /// Check every enabled option once, at submission time.
    pub fn validate(&self) -> Result<()> {
        if self.crop {
            self.crop_rect.validate()?;
        }
        if self.resize {
            self.target_resolution()?;
        }
        if self.watermark && self.watermark_text.trim().is_empty() {
            return Err(Error::validation("watermark text must not be empty"));
        }
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!("1080x1920".parse::<Resolution>().unwrap(), Resolution::new(1080, 1920));
        assert_eq!(" 640X360 ".parse::<Resolution>().unwrap(), Resolution::new(640, 360));
        assert!("1080".parse::<Resolution>().is_err());
        assert!("0x100".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
        assert_eq!(Resolution::new(720, 1280).to_string(), "720x1280");
    }

    #[test]
    fn test_crop_parse() {
        let crop: CropRect = "10,20,300,400".parse().unwrap();
        assert_eq!(crop, CropRect::new(10, 20, 300, 400));

        let crop: CropRect = "0,0,100,100@2.5".parse().unwrap();
        assert_eq!(crop.start_offset_secs, 2.5);

        assert!("1,2,3".parse::<CropRect>().is_err());
        assert!("0,0,0,100".parse::<CropRect>().is_err());
        assert!("0,0,10,10@-1".parse::<CropRect>().is_err());
    }

    #[test]
    fn test_defaults_are_valid_and_inert() {
        let settings = ReuploadSettings::default();
        assert!(settings.validate().is_ok());
        assert!(!settings.has_transforms());
        assert_eq!(settings.target_resolution, "1080x1920");
        assert_eq!(settings.retry.max_retries, 3);
    }

    #[test]
    fn test_validate_enabled_steps_only() {
        let settings = ReuploadSettings {
            target_resolution: "garbage".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
        assert!(settings.with_resize("garbage").validate().is_err());

        let settings = ReuploadSettings::default().with_watermark("   ");
        assert!(settings.validate().is_err());

        let settings = ReuploadSettings {
            crop: true,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_retry_failed_disables_budget() {
        let settings = ReuploadSettings {
            retry_failed: false,
            ..Default::default()
        };
        assert_eq!(settings.effective_retry().max_retries, 0);
        assert_eq!(ReuploadSettings::default().effective_retry().max_retries, 3);
    }
}
