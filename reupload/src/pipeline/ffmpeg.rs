//! ffmpeg-backed media transformer.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error};

use super::ops::{TransformOp, WatermarkAnchor};
use super::transformer::{MediaTransformer, TransformedArtifact};

/// Runs each step as one ffmpeg invocation over scratch files.
pub struct FfmpegTransformer {
    ffmpeg_path: String,
}

impl FfmpegTransformer {
    pub fn new() -> Self {
        Self::with_ffmpeg_path("ffmpeg")
    }

    pub fn with_ffmpeg_path(path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: path.into(),
        }
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    /// Arguments for one step, excluding the binary.
    pub fn build_args(op: &TransformOp, input: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into()];

        if let TransformOp::Crop { rect } = op
            && rect.start_offset_secs > 0.0
        {
            args.push("-ss".into());
            args.push(format!("{:.2}", rect.start_offset_secs));
        }

        args.push("-i".into());
        args.push(input.display().to_string());
        args.push("-vf".into());
        args.push(video_filter(op, input));
        args.push("-c:a".into());
        args.push("copy".into());
        args.push(output.display().to_string());
        args
    }
}

impl Default for FfmpegTransformer {
    fn default() -> Self {
        Self::new()
    }
}

/// Scratch file holding the watermark text, next to the step input.
fn watermark_text_path(input: &Path) -> PathBuf {
    input.with_file_name("watermark.txt")
}

fn video_filter(op: &TransformOp, input: &Path) -> String {
    match op {
        TransformOp::Crop { rect } => {
            format!("crop={}:{}:{}:{}", rect.width, rect.height, rect.x, rect.y)
        }
        TransformOp::Resize { resolution } => {
            format!("scale={}:{}", resolution.width, resolution.height)
        }
        // The text is read from a file with expansion off, so it is drawn
        // verbatim whatever quotes, colons or percent signs it contains.
        TransformOp::Watermark {
            anchor: WatermarkAnchor::BottomRight,
            margin_px,
            ..
        } => format!(
            "drawtext=textfile={}:expansion=none:fontsize=24:fontcolor=white@0.8:x=w-tw-{m}:y=h-th-{m}",
            escape_filter_value(&watermark_text_path(input).display().to_string()),
            m = margin_px
        ),
    }
}

/// Escape a filter option value for both parsing levels of a filtergraph:
/// the option level (`\ ' :`) and the graph level (`\ ' , ; [ ]`).
fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str(r"\\\\"),
            '\'' => escaped.push_str(r"\\\'"),
            ':' => escaped.push_str(r"\\:"),
            ',' | ';' | '[' | ']' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

#[async_trait]
impl MediaTransformer for FfmpegTransformer {
    fn name(&self) -> &'static str {
        "FfmpegTransformer"
    }

    async fn apply(
        &self,
        op: &TransformOp,
        artifact: TransformedArtifact,
    ) -> std::result::Result<TransformedArtifact, String> {
        let ext = if artifact.format.is_empty() {
            "mp4"
        } else {
            artifact.format.as_str()
        };
        let dir = tempfile::tempdir().map_err(|e| format!("failed to create scratch dir: {e}"))?;
        let input = dir.path().join(format!("input.{ext}"));
        let output = dir.path().join(format!("output.{ext}"));

        tokio::fs::write(&input, &artifact.data)
            .await
            .map_err(|e| format!("failed to write scratch input: {e}"))?;
        if let TransformOp::Watermark { text, .. } = op {
            tokio::fs::write(watermark_text_path(&input), text.as_bytes())
                .await
                .map_err(|e| format!("failed to write watermark text: {e}"))?;
        }

        let args = Self::build_args(op, &input, &output);
        debug!(step = op.name(), ?args, "Running ffmpeg");

        let output_result = Command::new(&self.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to spawn ffmpeg: {e}"))?;

        if !output_result.status.success() {
            let stderr = String::from_utf8_lossy(&output_result.stderr);
            error!(step = op.name(), "ffmpeg failed: {}", stderr);
            return Err(format!(
                "ffmpeg exited with code {}",
                output_result.status.code().unwrap_or(-1)
            ));
        }

        let data = tokio::fs::read(&output)
            .await
            .map_err(|e| format!("failed to read ffmpeg output: {e}"))?;

        let mut applied = artifact.applied;
        applied.push(op.name().to_string());
        Ok(TransformedArtifact {
            data: Bytes::from(data),
            applied,
            ..artifact
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CropRect, Resolution};
    use std::path::PathBuf;

    fn paths() -> (PathBuf, PathBuf) {
        (PathBuf::from("/tmp/in.mp4"), PathBuf::from("/tmp/out.mp4"))
    }

    #[test]
    fn test_crop_args_with_offset() {
        let (input, output) = paths();
        let op = TransformOp::Crop {
            rect: CropRect::new(10, 20, 300, 400).with_start_offset(1.5),
        };
        let args = FfmpegTransformer::build_args(&op, &input, &output);
        assert_eq!(
            args,
            vec![
                "-y", "-hide_banner", "-ss", "1.50", "-i", "/tmp/in.mp4", "-vf",
                "crop=300:400:10:20", "-c:a", "copy", "/tmp/out.mp4"
            ]
        );
    }

    #[test]
    fn test_resize_filter() {
        let (input, output) = paths();
        let op = TransformOp::Resize {
            resolution: Resolution::new(1080, 1920),
        };
        let args = FfmpegTransformer::build_args(&op, &input, &output);
        assert!(!args.contains(&"-ss".to_string()));
        assert!(args.contains(&"scale=1080:1920".to_string()));
    }

    #[test]
    fn test_watermark_reads_text_from_file() {
        let (input, output) = paths();
        let op = TransformOp::Watermark {
            text: "it's 10:00, 100%".to_string(),
            anchor: WatermarkAnchor::BottomRight,
            margin_px: 20,
        };
        let args = FfmpegTransformer::build_args(&op, &input, &output);
        let filter = &args[args.iter().position(|a| a == "-vf").unwrap() + 1];
        assert!(filter.starts_with("drawtext=textfile=/tmp/watermark.txt:expansion=none:"));
        assert!(!filter.contains("it's"));
        assert!(filter.ends_with("x=w-tw-20:y=h-th-20"));
    }

    #[test]
    fn test_filter_value_escaping() {
        assert_eq!(escape_filter_value("/tmp/a/watermark.txt"), "/tmp/a/watermark.txt");
        assert_eq!(
            escape_filter_value(r"C:\clips\it's, [1]"),
            r"C\\:\\\\clips\\\\it\\\'s\, \[1\]"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_reports_reason() {
        let transformer = FfmpegTransformer::with_ffmpeg_path("/nonexistent/ffmpeg-binary");
        let artifact = TransformedArtifact {
            source_video_id: "v".to_string(),
            file_name: "a.mp4".to_string(),
            data: Bytes::from_static(b"x"),
            format: "mp4".to_string(),
            applied: Vec::new(),
        };
        let op = TransformOp::Resize {
            resolution: Resolution::new(2, 2),
        };
        let err = transformer.apply(&op, artifact).await.unwrap_err();
        assert!(err.contains("spawn"));
    }
}
