//! KDL configuration parsing for Cadence.
//!
//! This crate handles parsing of:
//! - Scheduler settings
//! - Queue declarations
//! - Project definitions and their triggers

pub mod error;
pub mod project;

pub use error::{ConfigError, ConfigResult};
pub use project::{
    DEFAULT_POLL_INTERVAL_MS, MAX_TRIGGER_SECONDS, ProjectConfig, SchedulerConfig, TriggerConfig,
    load_config, parse_config,
};
