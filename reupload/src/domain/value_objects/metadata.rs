//! Publish metadata value object.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Visibility requested from the destination.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Private,
    Unlisted,
}

/// Metadata handed to a publisher alongside the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMetadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub privacy: Privacy,
}

fn default_category() -> String {
    "Entertainment".to_string()
}

impl PublishMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            category: default_category(),
            privacy: Privacy::default(),
        }
    }

    /// Metadata titled after a file name without its extension.
    pub fn for_file_name(name: &str) -> Self {
        let title = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        Self::new(title)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_privacy(mut self, privacy: Privacy) -> Self {
        self.privacy = privacy;
        self
    }

    /// Whether a named metadata field carries a usable value.
    /// Unrecognized field names are never satisfied.
    pub fn has_field(&self, field: &str) -> bool {
        match field {
            "title" => !self.title.trim().is_empty(),
            "description" => !self.description.trim().is_empty(),
            "tags" => self.tags.iter().any(|t| !t.trim().is_empty()),
            "category" => !self.category.trim().is_empty(),
            "privacy" => true,
            _ => false,
        }
    }

    /// Required fields that are absent, in the order given.
    pub fn missing_fields<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .map(String::as_str)
            .filter(|field| !self.has_field(field))
            .collect()
    }
}
