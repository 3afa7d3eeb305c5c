//! Simulated platform publishers.
//!
//! No network traffic is generated. Each publisher waits for the configured
//! latency, re-applies the destination's server-side checks and answers with
//! an id and URL shaped like the real platform's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{PublishError, PublishOutcome, Publisher, validate_artifact};
use crate::domain::{DestinationConfig, Engagement, PublishMetadata};
use crate::pipeline::TransformedArtifact;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Behaviour of the simulated upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Time one upload takes.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Probability in [0, 1] that an upload ends in a network error.
    #[serde(default)]
    pub failure_rate: f64,
}

fn default_latency_ms() -> u64 {
    500
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            failure_rate: 0.0,
        }
    }
}

impl SimulationConfig {
    /// No latency and no injected failures.
    pub fn instant() -> Self {
        Self {
            latency_ms: 0,
            failure_rate: 0.0,
        }
    }

    async fn upload(
        &self,
        artifact: &TransformedArtifact,
        metadata: &PublishMetadata,
        destination: &DestinationConfig,
    ) -> Result<Engagement, PublishError> {
        validate_artifact(artifact, metadata, destination)?;

        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }

        if self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate {
            return Err(PublishError::NetworkError(format!(
                "connection to {} reset during upload",
                destination.name
            )));
        }

        Ok(Engagement {
            views: rand::random::<u64>() % 10_000,
            likes: rand::random::<u64>() % 1_000,
            shares: rand::random::<u64>() % 200,
            comments: rand::random::<u64>() % 100,
        })
    }
}

fn random_token(len: usize) -> String {
    (0..len)
        .map(|_| ID_ALPHABET[(rand::random::<u64>() % ID_ALPHABET.len() as u64) as usize] as char)
        .collect()
}

fn random_digits(len: usize) -> String {
    (0..len)
        .map(|i| {
            let digit = rand::random::<u64>() % 10;
            // No leading zero.
            let digit = if i == 0 { digit.max(1) } else { digit };
            char::from(b'0' + digit as u8)
        })
        .collect()
}

/// TikTok: numeric video ids under the account handle.
pub struct TikTokPublisher {
    handle: String,
    simulation: SimulationConfig,
}

impl TikTokPublisher {
    pub fn new(handle: impl Into<String>, simulation: SimulationConfig) -> Self {
        Self {
            handle: handle.into(),
            simulation,
        }
    }
}

#[async_trait]
impl Publisher for TikTokPublisher {
    fn destination_id(&self) -> &str {
        "tiktok"
    }

    async fn publish(
        &self,
        artifact: &TransformedArtifact,
        metadata: &PublishMetadata,
        destination: &DestinationConfig,
    ) -> Result<PublishOutcome, PublishError> {
        debug!(file = %artifact.file_name, tags = ?metadata.tags, "Uploading to TikTok");
        let engagement = self.simulation.upload(artifact, metadata, destination).await?;
        let remote_id = random_digits(19);
        let url = format!("https://www.tiktok.com/@{}/video/{}", self.handle, remote_id);
        info!(%remote_id, "TikTok upload accepted");
        Ok(PublishOutcome {
            remote_id,
            url,
            engagement,
        })
    }
}

/// YouTube: 11 character video ids.
pub struct YouTubePublisher {
    simulation: SimulationConfig,
}

impl YouTubePublisher {
    pub fn new(simulation: SimulationConfig) -> Self {
        Self { simulation }
    }
}

#[async_trait]
impl Publisher for YouTubePublisher {
    fn destination_id(&self) -> &str {
        "youtube"
    }

    async fn publish(
        &self,
        artifact: &TransformedArtifact,
        metadata: &PublishMetadata,
        destination: &DestinationConfig,
    ) -> Result<PublishOutcome, PublishError> {
        debug!(
            file = %artifact.file_name,
            category = %metadata.category,
            privacy = %metadata.privacy,
            "Uploading to YouTube"
        );
        let engagement = self.simulation.upload(artifact, metadata, destination).await?;
        let remote_id = random_token(11);
        let url = format!("https://www.youtube.com/watch?v={remote_id}");
        info!(%remote_id, "YouTube upload accepted");
        Ok(PublishOutcome {
            remote_id,
            url,
            engagement,
        })
    }
}

/// Instagram: reels addressed by shortcode.
pub struct InstagramPublisher {
    simulation: SimulationConfig,
}

impl InstagramPublisher {
    pub fn new(simulation: SimulationConfig) -> Self {
        Self { simulation }
    }
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn destination_id(&self) -> &str {
        "instagram"
    }

    async fn publish(
        &self,
        artifact: &TransformedArtifact,
        metadata: &PublishMetadata,
        destination: &DestinationConfig,
    ) -> Result<PublishOutcome, PublishError> {
        debug!(file = %artifact.file_name, "Uploading to Instagram");
        let engagement = self.simulation.upload(artifact, metadata, destination).await?;
        let remote_id = random_token(11);
        let url = format!("https://www.instagram.com/reel/{remote_id}/");
        info!(%remote_id, "Instagram upload accepted");
        Ok(PublishOutcome {
            remote_id,
            url,
            engagement,
        })
    }
}
