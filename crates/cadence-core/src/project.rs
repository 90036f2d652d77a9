//! Integratable trait and integration results.
//!
//! An integratable is a project the scheduler can build. The scheduler never
//! looks inside a build: it only calls `integrate` and the two state
//! notifications around it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::{IntegrationRequest, Result, Trigger};

/// Outcome of one integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Success,
    Failure,
    /// The build could not be carried out (the integration itself faulted).
    Exception,
    Cancelled,
    Unknown,
}

impl IntegrationStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, IntegrationStatus::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Success => "success",
            IntegrationStatus::Failure => "failure",
            IntegrationStatus::Exception => "exception",
            IntegrationStatus::Cancelled => "cancelled",
            IntegrationStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationResult {
    /// Name of the project that was integrated.
    pub project: String,
    /// The request that started the integration.
    pub request: IntegrationRequest,
    /// Final status.
    pub status: IntegrationStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IntegrationResult {
    /// Build a result that finishes now.
    pub fn finished(
        project: impl Into<String>,
        request: IntegrationRequest,
        status: IntegrationStatus,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            project: project.into(),
            request,
            status,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// A project the scheduler integrates.
#[async_trait]
pub trait Integratable: Send + Sync {
    /// Unique project name.
    fn name(&self) -> &str;

    /// Name of the integration queue this project builds through.
    fn queue_name(&self) -> &str;

    /// Priority within the queue. Lower values are served first.
    fn queue_priority(&self) -> i32;

    /// The trigger that decides when this project builds.
    fn trigger(&self) -> Arc<dyn Trigger>;

    /// Run one integration. An error is a build fault; the scheduler logs it
    /// and carries on.
    async fn integrate(&self, request: &IntegrationRequest) -> Result<IntegrationResult>;

    /// Called when a request for this project enters its queue.
    fn notify_pending_state(&self);

    /// Called after every integration attempt, whether it succeeded or not.
    fn notify_sleeping_state(&self);
}
