//! Publisher trait and related types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DestinationConfig, Engagement, FailureCode, PublishMetadata};
use crate::pipeline::TransformedArtifact;

/// What a destination reports back after accepting an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub remote_id: String,
    pub url: String,
    #[serde(default)]
    pub engagement: Engagement,
}

/// Why a publish did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("artifact is {size} bytes, destination accepts at most {max}")]
    SizeExceeded { size: u64, max: u64 },

    #[error("format '{format}' is not accepted (supported: {})", .supported.join(", "))]
    UnsupportedFormat {
        format: String,
        supported: Vec<String>,
    },

    #[error("missing required metadata: {}", .0.join(", "))]
    MissingMetadata(Vec<String>),

    #[error("rejected by destination: {0}")]
    RemoteRejected(String),

    #[error("network error: {0}")]
    NetworkError(String),
}

impl PublishError {
    /// Only remote-side problems are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteRejected(_) | Self::NetworkError(_))
    }

    pub fn code(&self) -> FailureCode {
        match self {
            Self::SizeExceeded { .. } => FailureCode::SizeExceeded,
            Self::UnsupportedFormat { .. } => FailureCode::UnsupportedFormat,
            Self::MissingMetadata(_) => FailureCode::MissingMetadata,
            Self::RemoteRejected(_) => FailureCode::RemoteRejected,
            Self::NetworkError(_) => FailureCode::NetworkError,
        }
    }
}

/// Uploads an artifact to one destination.
///
/// # Cancel Safety
///
/// The orchestrator wraps calls in a timeout, so implementations must
/// tolerate being dropped mid-upload.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Destination id this publisher serves.
    fn destination_id(&self) -> &str;

    async fn publish(
        &self,
        artifact: &TransformedArtifact,
        metadata: &PublishMetadata,
        destination: &DestinationConfig,
    ) -> Result<PublishOutcome, PublishError>;
}
