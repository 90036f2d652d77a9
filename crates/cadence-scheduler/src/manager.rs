//! Integrator manager - owns every project's integrator and the queues they
//! share.

use cadence_core::{Integratable, IntegrationRequest, IntegrationStatus};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{SchedulerError, SchedulerResult};
use crate::integrator::{IntegratorOptions, IntegratorState, ProjectIntegrator};
use crate::queue::QueueSnapshot;
use crate::queue_set::IntegrationQueueSet;

/// Summary of one integrator, for status display.
#[derive(Debug, Clone)]
pub struct IntegratorStatus {
    pub project: String,
    pub queue: String,
    pub state: IntegratorState,
    pub integrations: u64,
    pub last_status: Option<IntegrationStatus>,
}

/// Process-wide owner of project integrators.
pub struct IntegratorManager {
    queues: Arc<IntegrationQueueSet>,
    integrators: Vec<Arc<ProjectIntegrator>>,
    by_name: HashMap<String, usize>,
}

impl IntegratorManager {
    /// Build one integrator per project, creating each project's queue on
    /// first use.
    pub fn new(
        projects: Vec<Arc<dyn Integratable>>,
        options: IntegratorOptions,
    ) -> SchedulerResult<Self> {
        Self::build(projects, Arc::new(IntegrationQueueSet::new()), options, true)
    }

    /// Build one integrator per project over a pre-declared queue set.
    ///
    /// A project naming a queue missing from `queues` is an
    /// [`UnknownQueue`](SchedulerError::UnknownQueue) error.
    pub fn with_queues(
        projects: Vec<Arc<dyn Integratable>>,
        queues: Arc<IntegrationQueueSet>,
        options: IntegratorOptions,
    ) -> SchedulerResult<Self> {
        Self::build(projects, queues, options, false)
    }

    fn build(
        projects: Vec<Arc<dyn Integratable>>,
        queues: Arc<IntegrationQueueSet>,
        options: IntegratorOptions,
        create_queues: bool,
    ) -> SchedulerResult<Self> {
        let mut integrators = Vec::with_capacity(projects.len());
        let mut by_name = HashMap::with_capacity(projects.len());

        for project in projects {
            let name = project.name().to_string();
            if by_name.contains_key(&name) {
                return Err(SchedulerError::DuplicateProject(name));
            }

            let queue = if create_queues {
                queues.add(project.queue_name())
            } else {
                queues.queue(project.queue_name())?
            };
            let integrator = ProjectIntegrator::with_options(project, queue, options.clone());
            by_name.insert(name, integrators.len());
            integrators.push(Arc::new(integrator));
        }

        Ok(Self {
            queues,
            integrators,
            by_name,
        })
    }

    pub fn queues(&self) -> &Arc<IntegrationQueueSet> {
        &self.queues
    }

    pub fn integrators(&self) -> &[Arc<ProjectIntegrator>] {
        &self.integrators
    }

    pub fn get(&self, project: &str) -> SchedulerResult<&Arc<ProjectIntegrator>> {
        self.by_name
            .get(project)
            .map(|&index| &self.integrators[index])
            .ok_or_else(|| SchedulerError::UnknownProject(project.to_string()))
    }

    pub fn start_all(&self) {
        info!(projects = self.integrators.len(), queues = self.queues.len(), "starting integrators");
        for integrator in &self.integrators {
            integrator.start();
        }
    }

    /// Ask every integrator to stop, then wait for all of them to exit.
    pub async fn stop_all(&self) {
        info!("stopping integrators");
        for integrator in &self.integrators {
            integrator.stop();
        }
        join_all(self.integrators.iter().map(|i| i.wait_for_exit())).await;
    }

    /// Abort every integrator and wait for all of them to exit.
    pub async fn abort_all(&self) {
        info!("aborting integrators");
        join_all(self.integrators.iter().map(|i| i.abort())).await;
    }

    pub fn force_build(&self, project: &str) -> SchedulerResult<()> {
        self.get(project)?.force_build();
        Ok(())
    }

    pub fn request(&self, project: &str, request: IntegrationRequest) -> SchedulerResult<()> {
        self.get(project)?.request(request);
        Ok(())
    }

    /// Cancel the project's waiting queue items. Returns how many were removed.
    pub fn cancel_pending(&self, project: &str) -> SchedulerResult<usize> {
        Ok(self.get(project)?.cancel_pending_request())
    }

    pub fn state(&self, project: &str) -> SchedulerResult<IntegratorState> {
        Ok(self.get(project)?.state())
    }

    pub fn statuses(&self) -> Vec<IntegratorStatus> {
        self.integrators
            .iter()
            .map(|integrator| IntegratorStatus {
                project: integrator.name().to_string(),
                queue: integrator.queue().name().to_string(),
                state: integrator.state(),
                integrations: integrator.integration_count(),
                last_status: integrator.last_status(),
            })
            .collect()
    }

    pub fn queue_snapshots(&self) -> Vec<QueueSnapshot> {
        self.queues.snapshots()
    }
}
