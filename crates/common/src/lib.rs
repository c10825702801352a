#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared types and ambient infrastructure for the Orion orchestration
//! engine: the DAG value model, the error taxonomy, configuration,
//! telemetry and metrics.

pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;
