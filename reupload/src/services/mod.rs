//! Service layer: wiring of the application services.

pub mod container;

pub use container::{ServiceContainer, ServiceStats};
