//! Database models.
//!
//! These map directly to the schema and carry JSON columns as strings.

pub mod destination;
pub mod history;
pub mod task;

pub use destination::*;
pub use history::*;
pub use task::*;
