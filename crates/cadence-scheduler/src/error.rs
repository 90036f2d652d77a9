//! Scheduler setup errors.

use thiserror::Error;

/// Configuration faults raised while wiring projects to queues.
///
/// These surface before any worker starts; a running integrator never
/// returns one.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown integration queue: {0}")]
    UnknownQueue(String),

    #[error("unknown project: {0}")]
    UnknownProject(String),

    #[error("duplicate project: {0}")]
    DuplicateProject(String),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
