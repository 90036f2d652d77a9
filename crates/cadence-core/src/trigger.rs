//! Trigger trait.
//!
//! Triggers decide *when* a project should integrate. The integrator polls
//! `fire` in its loop and reports back through `integration_completed` once
//! the cycle started by a request has finished.

use async_trait::async_trait;

use crate::IntegrationRequest;

#[async_trait]
pub trait Trigger: Send + Sync {
    /// Poll the trigger. Returns `None` when no build is needed right now.
    ///
    /// Implementations may wait internally; the integrator cancels the
    /// returned future when it is aborted.
    async fn fire(&self) -> Option<IntegrationRequest>;

    /// Called after every integration cycle, whatever its outcome.
    fn integration_completed(&self);
}
