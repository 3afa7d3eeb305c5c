//! Destination configuration.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Publish quota of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum successful publishes per calendar day.
    pub daily: u32,
    /// Maximum successful publishes per clock hour.
    pub hourly: u32,
}

impl RateLimitPolicy {
    pub fn new(daily: u32, hourly: u32) -> Self {
        Self { daily, hourly }
    }
}

/// Immutable description of a publishing target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Lowercase identifier, also used to select the publisher.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Upload endpoint label, informational.
    #[serde(default)]
    pub api_endpoint: String,
    /// Maximum artifact size in bytes.
    pub max_size_bytes: u64,
    /// Accepted container formats (file extensions, lowercase).
    pub supported_formats: Vec<String>,
    /// Metadata fields that must be present.
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Publish quota; `None` means unlimited.
    #[serde(default)]
    pub rate_limit: Option<RateLimitPolicy>,
}

impl DestinationConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            api_endpoint: String::new(),
            max_size_bytes: u64::MAX,
            supported_formats: Vec::new(),
            required_fields: Vec::new(),
            rate_limit: None,
        }
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rate_limit(mut self, daily: u32, hourly: u32) -> Self {
        self.rate_limit = Some(RateLimitPolicy::new(daily, hourly));
        self
    }

    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = endpoint.into();
        self
    }

    /// Case-insensitive format check.
    pub fn accepts_format(&self, format: &str) -> bool {
        self.supported_formats
            .iter()
            .any(|f| f.eq_ignore_ascii_case(format))
    }

    pub fn tiktok() -> Self {
        Self::new("tiktok", "TikTok")
            .with_api_endpoint("/api/tiktok/upload")
            .with_max_size(500 * MIB)
            .with_formats(["mp4", "mov", "avi"])
            .with_required_fields(["title", "description", "tags"])
            .with_rate_limit(10, 3)
    }

    pub fn youtube() -> Self {
        Self::new("youtube", "YouTube")
            .with_api_endpoint("/api/youtube/upload")
            .with_max_size(2 * GIB)
            .with_formats(["mp4", "mov", "avi", "wmv", "flv"])
            .with_required_fields(["title", "description", "category"])
            .with_rate_limit(6, 2)
    }

    pub fn instagram() -> Self {
        Self::new("instagram", "Instagram")
            .with_api_endpoint("/api/instagram/upload")
            .with_max_size(100 * MIB)
            .with_formats(["mp4", "mov"])
            .with_required_fields(["title", "description"])
            .with_rate_limit(25, 5)
    }

    /// The destinations known out of the box.
    pub fn builtin() -> Vec<Self> {
        vec![Self::tiktok(), Self::youtube(), Self::instagram()]
    }
}

/// Read-only set of destinations loaded at start-up, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct DestinationCatalog {
    entries: Vec<DestinationConfig>,
}

impl DestinationCatalog {
    /// Build a catalog, rejecting empty or duplicate ids.
    pub fn new(entries: Vec<DestinationConfig>) -> Result<Self> {
        for (idx, entry) in entries.iter().enumerate() {
            if entry.id.trim().is_empty() {
                return Err(Error::config("destination id must not be empty"));
            }
            if entries[..idx].iter().any(|e| e.id == entry.id) {
                return Err(Error::config(format!(
                    "duplicate destination id '{}'",
                    entry.id
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn builtin() -> Self {
        Self {
            entries: DestinationConfig::builtin(),
        }
    }

    /// Lookup by id, case-insensitive.
    pub fn get(&self, id: &str) -> Option<&DestinationConfig> {
        self.entries.iter().find(|e| e.id.eq_ignore_ascii_case(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DestinationConfig> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
