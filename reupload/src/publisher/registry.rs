//! Destination id to publisher mapping.

use dashmap::DashMap;
use std::sync::Arc;

use super::platforms::{InstagramPublisher, SimulationConfig, TikTokPublisher, YouTubePublisher};
use super::Publisher;
use crate::domain::DestinationCatalog;
use crate::{Error, Result};

/// Publishers keyed by lowercase destination id.
#[derive(Default)]
pub struct PublisherRegistry {
    publishers: DashMap<String, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the simulated TikTok, YouTube and Instagram publishers.
    pub fn simulated(simulation: SimulationConfig) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(TikTokPublisher::new("reupload", simulation.clone())));
        registry.register(Arc::new(YouTubePublisher::new(simulation.clone())));
        registry.register(Arc::new(InstagramPublisher::new(simulation)));
        registry
    }

    /// Add or replace the publisher for its destination.
    pub fn register(&self, publisher: Arc<dyn Publisher>) {
        let id = publisher.destination_id().to_ascii_lowercase();
        if self.publishers.insert(id.clone(), publisher).is_some() {
            tracing::debug!(destination = %id, "Replaced publisher");
        }
    }

    pub fn get(&self, destination_id: &str) -> Option<Arc<dyn Publisher>> {
        self.publishers
            .get(&destination_id.to_ascii_lowercase())
            .map(|p| Arc::clone(p.value()))
    }

    pub fn contains(&self, destination_id: &str) -> bool {
        self.publishers
            .contains_key(&destination_id.to_ascii_lowercase())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.publishers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Every destination in the catalog must have a publisher.
    pub fn ensure_covers(&self, catalog: &DestinationCatalog) -> Result<()> {
        for destination in catalog.iter() {
            if !self.contains(&destination.id) {
                return Err(Error::config(format!(
                    "no publisher registered for destination '{}'",
                    destination.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DestinationConfig;

    #[test]
    fn test_simulated_covers_builtin() {
        let registry = PublisherRegistry::simulated(SimulationConfig::instant());
        assert_eq!(registry.ids(), vec!["instagram", "tiktok", "youtube"]);
        assert!(registry.get("YouTube").is_some());
        assert!(registry.ensure_covers(&DestinationCatalog::builtin()).is_ok());
    }

    #[test]
    fn test_missing_publisher_detected() {
        let registry = PublisherRegistry::simulated(SimulationConfig::instant());
        let catalog = DestinationCatalog::new(vec![DestinationConfig::new("vimeo", "Vimeo")]).unwrap();
        assert!(registry.ensure_covers(&catalog).is_err());
    }
}
