//! Local checks run before contacting a destination.

use super::PublishError;
use crate::domain::{DestinationConfig, PublishMetadata};
use crate::pipeline::TransformedArtifact;

/// Fail fast on size, format and required metadata.
///
/// Checks run in that order and the first violation is returned.
pub fn validate_artifact(
    artifact: &TransformedArtifact,
    metadata: &PublishMetadata,
    destination: &DestinationConfig,
) -> Result<(), PublishError> {
    let size = artifact.size_bytes();
    if size > destination.max_size_bytes {
        return Err(PublishError::SizeExceeded {
            size,
            max: destination.max_size_bytes,
        });
    }

    if !destination.accepts_format(&artifact.format) {
        return Err(PublishError::UnsupportedFormat {
            format: artifact.format.clone(),
            supported: destination.supported_formats.clone(),
        });
    }

    let missing = metadata.missing_fields(&destination.required_fields);
    if !missing.is_empty() {
        return Err(PublishError::MissingMetadata(
            missing.into_iter().map(str::to_string).collect(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn artifact(format: &str, size: usize) -> TransformedArtifact {
        TransformedArtifact {
            source_video_id: "v".into(),
            file_name: format!("clip.{format}"),
            data: Bytes::from(vec![0u8; size]),
            format: format.into(),
            applied: Vec::new(),
        }
    }

    fn full_metadata() -> PublishMetadata {
        PublishMetadata::new("Title")
            .with_description("desc")
            .with_tags(["a", "b"])
    }

    #[test]
    fn test_accepts_valid_artifact() {
        let dest = DestinationConfig::tiktok();
        assert!(validate_artifact(&artifact("mp4", 10), &full_metadata(), &dest).is_ok());
    }

    #[test]
    fn test_size_checked_first() {
        let dest = DestinationConfig::new("tiny", "Tiny")
            .with_max_size(4)
            .with_formats(["mp4"]);
        let err = validate_artifact(&artifact("mkv", 5), &PublishMetadata::new(""), &dest).unwrap_err();
        assert_eq!(err, PublishError::SizeExceeded { size: 5, max: 4 });
    }

    #[test]
    fn test_format_rejected() {
        let err = validate_artifact(
            &artifact("avi", 1),
            &full_metadata(),
            &DestinationConfig::instagram(),
        )
        .unwrap_err();
        assert!(matches!(err, PublishError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_missing_metadata_listed() {
        let err = validate_artifact(
            &artifact("mp4", 1),
            &PublishMetadata::new("Only a title"),
            &DestinationConfig::tiktok(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PublishError::MissingMetadata(vec!["description".into(), "tags".into()])
        );
    }
}
