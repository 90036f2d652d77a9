//! Integration scheduling for Cadence.
//!
//! Runs one integrator per project and serializes their builds through named
//! queues: at most one integration per queue at a time, waiting work served
//! by priority.

pub mod error;
pub mod integrator;
pub mod manager;
pub mod queue;
pub mod queue_set;
pub mod trigger;

#[cfg(test)]
mod test_support;

pub use error::{SchedulerError, SchedulerResult};
pub use integrator::{IntegratorOptions, IntegratorState, ProjectIntegrator};
pub use manager::{IntegratorManager, IntegratorStatus};
pub use queue::{
    Admission, IntegrationQueue, IntegrationQueueItem, QueueLease, QueueSnapshot,
    QueuedIntegration,
};
pub use queue_set::IntegrationQueueSet;
pub use trigger::{IntervalTrigger, ManualTrigger, MultipleTrigger};
