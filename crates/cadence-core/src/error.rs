//! Error types for Cadence.

use thiserror::Error;

/// Errors an [`Integratable`](crate::Integratable) reports from `integrate`.
#[derive(Debug, Error)]
pub enum Error {
    /// The build could not be carried out.
    #[error("integration failed: {0}")]
    IntegrationFailed(String),

    /// The build gave up before finishing. Recorded as a cancelled integration
    /// rather than a fault.
    #[error("integration cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
