//! reupload library crate.
//!
//! Ingests local videos and republishes them to several destinations,
//! honouring per-destination size, format, metadata and rate-limit rules.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod history;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod publisher;
pub mod rate_limit;
pub mod scheduler;
pub mod services;

pub use error::{Error, Result};
