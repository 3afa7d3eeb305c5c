//! Repository layer for database access.

pub mod destination;
pub mod task;

pub use destination::*;
pub use task::*;
