//! Per-project integrator.
//!
//! Each integrator owns one worker task. The worker polls the project's
//! trigger (or takes a forced/explicit request), queues the request, and runs
//! the integration once the project's queue admits it.

use cadence_core::{
    BuildCondition, Error, Integratable, IntegrationRequest, IntegrationStatus, IntegratorId,
};
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::{IntegrationQueue, IntegrationQueueItem};

/// Source name recorded on requests created by [`ProjectIntegrator::force_build`].
pub const FORCE_BUILD_SOURCE: &str = "force-build";

/// Default pause between trigger polls that yield nothing.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle state of an integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorState {
    Stopped,
    Running,
}

impl std::fmt::Display for IntegratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegratorState::Stopped => f.write_str("stopped"),
            IntegratorState::Running => f.write_str("running"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntegratorOptions {
    /// How long the worker sleeps after a trigger poll yields nothing.
    pub poll_interval: Duration,
}

impl Default for IntegratorOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// State shared between an integrator and its worker task.
struct Shared {
    state: watch::Sender<IntegratorState>,
    stop_requested: AtomicBool,
    requests: Mutex<VecDeque<IntegrationRequest>>,
    /// Signalled by direct requests. Interrupts a trigger poll or idle sleep.
    wake: Notify,
    /// Signalled by `stop`. Only cuts an idle sleep short.
    stopping: Notify,
    integrations: AtomicU64,
    last_status: Mutex<Option<IntegrationStatus>>,
}

impl Shared {
    fn take_request(&self) -> Option<IntegrationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn record(&self, status: IntegrationStatus) {
        self.integrations.fetch_add(1, Ordering::SeqCst);
        *self
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(status);
    }
}

struct WorkerHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Drives integrations for one project.
pub struct ProjectIntegrator {
    id: IntegratorId,
    project: Arc<dyn Integratable>,
    queue: IntegrationQueue,
    options: IntegratorOptions,
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl ProjectIntegrator {
    pub fn new(project: Arc<dyn Integratable>, queue: IntegrationQueue) -> Self {
        Self::with_options(project, queue, IntegratorOptions::default())
    }

    pub fn with_options(
        project: Arc<dyn Integratable>,
        queue: IntegrationQueue,
        options: IntegratorOptions,
    ) -> Self {
        let (state, _) = watch::channel(IntegratorState::Stopped);
        Self {
            id: IntegratorId::new(),
            project,
            queue,
            options,
            shared: Arc::new(Shared {
                state,
                stop_requested: AtomicBool::new(false),
                requests: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                stopping: Notify::new(),
                integrations: AtomicU64::new(0),
                last_status: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> IntegratorId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.project.name()
    }

    pub fn project(&self) -> &Arc<dyn Integratable> {
        &self.project
    }

    pub fn queue(&self) -> &IntegrationQueue {
        &self.queue
    }

    pub fn state(&self) -> IntegratorState {
        *self.shared.state.borrow()
    }

    /// Number of integrations this integrator has run.
    pub fn integration_count(&self) -> u64 {
        self.shared.integrations.load(Ordering::SeqCst)
    }

    /// Status of the most recent integration, if any has run.
    pub fn last_status(&self) -> Option<IntegrationStatus> {
        *self
            .shared
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker. Does nothing while a worker is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut worker = self.lock_worker();
        if self.state() == IntegratorState::Running {
            debug!(project = %self.name(), "integrator already running");
            return;
        }

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared.state.send_replace(IntegratorState::Running);

        let cancel = CancellationToken::new();
        let context = WorkerContext {
            id: self.id,
            project: Arc::clone(&self.project),
            queue: self.queue.clone(),
            poll_interval: self.options.poll_interval,
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(context.run());
        *worker = Some(WorkerHandle { task, cancel });

        info!(project = %self.name(), queue = %self.queue.name(), "integrator started");
    }

    /// Ask the worker to exit after its current iteration. Returns at once.
    ///
    /// A trigger poll or integration already in progress runs to completion.
    pub fn stop(&self) {
        if self.state() == IntegratorState::Stopped {
            return;
        }
        info!(project = %self.name(), "integrator stop requested");
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.stopping.notify_one();
    }

    /// Terminate the worker wherever it is waiting (trigger, queue or
    /// integration) and wait until it has exited.
    pub async fn abort(&self) {
        {
            let worker = self.lock_worker();
            if let Some(handle) = worker.as_ref() {
                if !handle.cancel.is_cancelled() {
                    info!(project = %self.name(), "integrator abort requested");
                }
                self.shared.stop_requested.store(true, Ordering::SeqCst);
                handle.cancel.cancel();
            }
        }
        self.wait_for_exit().await;
    }

    /// Wait until the worker has fully exited. Returns at once if no worker
    /// is running.
    pub async fn wait_for_exit(&self) {
        let mut state = self.shared.state.subscribe();
        // The sender lives in `self.shared`, so this cannot fail.
        let _ = state
            .wait_for(|state| *state == IntegratorState::Stopped)
            .await;

        // `start` swaps the handle under this lock, so while the state still
        // reads stopped the stored handle belongs to the exited worker.
        let finished = {
            let mut worker = self.lock_worker();
            if self.state() == IntegratorState::Stopped {
                worker.take()
            } else {
                None
            }
        };
        if let Some(handle) = finished {
            if let Err(e) = handle.task.await {
                if e.is_panic() {
                    error!(project = %self.name(), "integrator worker panicked");
                }
            }
        }
    }

    /// Build with a `ForceBuild` request on the next iteration, without
    /// consulting the trigger.
    pub fn force_build(&self) {
        self.request(IntegrationRequest::force_build(FORCE_BUILD_SOURCE));
    }

    /// Build with exactly `request` on the next iteration, without consulting
    /// the trigger.
    pub fn request(&self, request: IntegrationRequest) {
        info!(
            project = %self.name(),
            condition = %request.condition(),
            source = %request.source(),
            "integration requested"
        );
        self.shared
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(request);
        self.shared.wake.notify_one();
    }

    /// Remove this integrator's waiting items from its queue. The active
    /// integration, if any, is not affected. Returns how many were removed.
    pub fn cancel_pending_request(&self) -> usize {
        let removed = self.queue.remove_pending_requests(self.id);
        if removed == 0 {
            debug!(project = %self.name(), "no pending integration to cancel");
        }
        removed
    }
}

impl Drop for ProjectIntegrator {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_worker().take() {
            handle.cancel.cancel();
        }
    }
}

enum Step {
    Integrate(IntegrationRequest),
    Idle,
    Woken,
    Aborted,
}

/// Marks the integrator stopped when the worker exits, however it exits.
struct ExitGuard {
    project: String,
    shared: Arc<Shared>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(project = %self.project, "integrator worker panicked, integrator stopped");
        }
        self.shared.state.send_replace(IntegratorState::Stopped);
    }
}

struct WorkerContext {
    id: IntegratorId,
    project: Arc<dyn Integratable>,
    queue: IntegrationQueue,
    poll_interval: Duration,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn run(self) {
        let name = self.project.name().to_string();
        let _exit = ExitGuard {
            project: name.clone(),
            shared: Arc::clone(&self.shared),
        };
        debug!(project = %name, integrator = %self.id, "integrator worker running");

        while !self.should_exit() {
            match self.next_step().await {
                Step::Integrate(request) => self.process(request).await,
                Step::Idle => self.idle().await,
                Step::Woken => {}
                Step::Aborted => break,
            }
        }

        info!(project = %name, "integrator stopped");
    }

    fn should_exit(&self) -> bool {
        self.cancel.is_cancelled() || self.shared.stop_requested.load(Ordering::SeqCst)
    }

    /// Take a direct request, or poll the trigger.
    async fn next_step(&self) -> Step {
        if let Some(request) = self.shared.take_request() {
            return Step::Integrate(request);
        }

        let trigger = self.project.trigger();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Step::Aborted,
            _ = self.shared.wake.notified() => Step::Woken,
            fired = trigger.fire() => match fired {
                Some(request) if request.condition() != BuildCondition::NoBuild => {
                    debug!(
                        project = %self.project.name(),
                        condition = %request.condition(),
                        source = %request.source(),
                        "trigger fired"
                    );
                    Step::Integrate(request)
                }
                _ => Step::Idle,
            },
        }
    }

    async fn idle(&self) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = self.shared.wake.notified() => {}
            _ = self.shared.stopping.notified() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }

    /// Queue `request`, wait for admission, then integrate.
    async fn process(&self, request: IntegrationRequest) {
        let (item, admission) =
            IntegrationQueueItem::new(Arc::clone(&self.project), request.clone(), self.id);
        self.queue.enqueue(item);

        let lease = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.queue.remove_pending_requests(self.id);
                return;
            }
            lease = admission.admitted() => lease,
        };
        let Some(lease) = lease else {
            info!(project = %self.project.name(), "pending integration was cancelled");
            return;
        };

        self.integrate(&request).await;
        drop(lease);
    }

    /// Run the integration. Sleeping-state and completion notifications
    /// always follow, whatever the integration did.
    async fn integrate(&self, request: &IntegrationRequest) {
        let name = self.project.name();
        info!(
            project = %name,
            queue = %self.queue.name(),
            condition = %request.condition(),
            source = %request.source(),
            "integration started"
        );

        let integration = AssertUnwindSafe(self.project.integrate(request)).catch_unwind();
        let status = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(project = %name, "integration aborted");
                IntegrationStatus::Cancelled
            }
            outcome = integration => match outcome {
                Ok(Ok(result)) => {
                    info!(
                        project = %name,
                        status = %result.status,
                        duration_ms = result.duration().num_milliseconds(),
                        "integration finished"
                    );
                    result.status
                }
                Ok(Err(Error::Cancelled)) => {
                    warn!(project = %name, "integration cancelled by project");
                    IntegrationStatus::Cancelled
                }
                Ok(Err(e)) => {
                    error!(project = %name, error = %e, "integration failed");
                    IntegrationStatus::Exception
                }
                Err(panic) => {
                    error!(project = %name, panic = %panic_message(panic.as_ref()), "integration panicked");
                    IntegrationStatus::Exception
                }
            },
        };

        self.shared.record(status);
        self.project.notify_sleeping_state();
        self.project.trigger().integration_completed();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
