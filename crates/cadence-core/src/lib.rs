//! Core domain types and traits for the Cadence integration scheduler.
//!
//! This crate contains:
//! - Integrator identifiers
//! - Integration requests and build conditions
//! - The `Trigger` and `Integratable` collaborator traits
//! - Integration results

pub mod error;
pub mod id;
pub mod project;
pub mod request;
pub mod trigger;

pub use error::{Error, Result};
pub use id::IntegratorId;
pub use project::{Integratable, IntegrationResult, IntegrationStatus};
pub use request::{BuildCondition, IntegrationRequest};
pub use trigger::Trigger;
