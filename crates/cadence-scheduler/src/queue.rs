//! Named integration queues.
//!
//! A queue serializes integrations for one shared resource. Items wait in
//! priority order (lower value first, FIFO among equals) and at most one item
//! is active at a time. An item becomes active when the queue hands a
//! [`QueueLease`] to the integrator that enqueued it; dropping the lease frees
//! the queue for the next item.

use cadence_core::{Integratable, IntegrationRequest, IntegratorId};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// One unit of scheduled work, owned by the queue until it is admitted or
/// cancelled.
pub struct IntegrationQueueItem {
    project: Arc<dyn Integratable>,
    request: IntegrationRequest,
    integrator: IntegratorId,
    admit: oneshot::Sender<QueueLease>,
}

impl IntegrationQueueItem {
    /// Create an item together with the [`Admission`] its integrator waits on.
    pub fn new(
        project: Arc<dyn Integratable>,
        request: IntegrationRequest,
        integrator: IntegratorId,
    ) -> (Self, Admission) {
        let (admit, rx) = oneshot::channel();
        let item = Self {
            project,
            request,
            integrator,
            admit,
        };
        (item, Admission { rx })
    }

    pub fn project(&self) -> &Arc<dyn Integratable> {
        &self.project
    }

    pub fn request(&self) -> &IntegrationRequest {
        &self.request
    }

    pub fn integrator(&self) -> IntegratorId {
        self.integrator
    }
}

impl std::fmt::Debug for IntegrationQueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationQueueItem")
            .field("project", &self.project.name())
            .field("request", &self.request)
            .field("integrator", &self.integrator)
            .finish()
    }
}

/// Resolves once the queue admits the item, or with `None` if the item was
/// removed from the queue first.
#[derive(Debug)]
pub struct Admission {
    rx: oneshot::Receiver<QueueLease>,
}

impl Admission {
    pub async fn admitted(self) -> Option<QueueLease> {
        self.rx.await.ok()
    }
}

/// Exclusive hold on a queue. The next waiting item is admitted when this is
/// dropped.
#[derive(Debug)]
pub struct QueueLease {
    queue: Option<Arc<QueueInner>>,
    ticket: u64,
}

impl QueueLease {
    fn disarm(&mut self) {
        self.queue = None;
    }
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.release(self.ticket);
        }
    }
}

/// Point-in-time view of one queued integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedIntegration {
    pub project: String,
    pub priority: i32,
    pub request: IntegrationRequest,
    pub integrator: IntegratorId,
    /// True for the item currently being integrated.
    pub active: bool,
}

/// Ordered snapshot of a whole queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub integrations: Vec<QueuedIntegration>,
}

struct WaitingItem {
    item: IntegrationQueueItem,
    priority: i32,
    ticket: u64,
}

impl WaitingItem {
    fn view(&self, active: bool) -> QueuedIntegration {
        QueuedIntegration {
            project: self.item.project.name().to_string(),
            priority: self.priority,
            request: self.item.request.clone(),
            integrator: self.item.integrator,
            active,
        }
    }
}

struct ActiveItem {
    view: QueuedIntegration,
    ticket: u64,
}

#[derive(Default)]
struct QueueState {
    waiting: Vec<WaitingItem>,
    active: Option<ActiveItem>,
    next_ticket: u64,
}

struct QueueInner {
    name: String,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for QueueInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueInner").field("name", &self.name).finish()
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(self: &Arc<Self>, ticket: u64) {
        let mut state = self.lock();
        if !matches!(&state.active, Some(active) if active.ticket == ticket) {
            return;
        }
        if let Some(active) = state.active.take() {
            debug!(queue = %self.name, project = %active.view.project, "queue released");
        }
        self.dispatch(&mut state);
    }

    /// Admit waiting items until one is active or nothing is left.
    ///
    /// Must be called with the state lock held. An item whose integrator has
    /// stopped waiting is discarded without occupying the queue.
    fn dispatch(self: &Arc<Self>, state: &mut QueueState) {
        while state.active.is_none() && !state.waiting.is_empty() {
            let next = state.waiting.remove(0);
            let view = next.view(true);
            let lease = QueueLease {
                queue: Some(Arc::clone(self)),
                ticket: next.ticket,
            };

            match next.item.admit.send(lease) {
                Ok(()) => {
                    debug!(
                        queue = %self.name,
                        project = %view.project,
                        condition = %view.request.condition(),
                        "admitted integration"
                    );
                    state.active = Some(ActiveItem {
                        view,
                        ticket: next.ticket,
                    });
                }
                Err(mut lease) => {
                    // Dropping an armed lease here would re-enter the lock.
                    lease.disarm();
                    warn!(
                        queue = %self.name,
                        project = %view.project,
                        "integrator stopped waiting; dropping queued integration"
                    );
                }
            }
        }
    }
}

/// A named queue serializing integrations for one shared resource.
///
/// Cloning yields another handle to the same queue.
#[derive(Debug, Clone)]
pub struct IntegrationQueue {
    inner: Arc<QueueInner>,
}

impl IntegrationQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Insert an item by priority and admit it at once if the queue is idle.
    ///
    /// The project's pending notification fires on the caller's thread before
    /// this returns, so it always precedes the integration that awaits the
    /// item's admission.
    pub fn enqueue(&self, item: IntegrationQueueItem) {
        let project = Arc::clone(&item.project);
        let priority = project.queue_priority();

        let mut state = self.inner.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let position = state
            .waiting
            .partition_point(|waiting| waiting.priority <= priority);
        info!(
            queue = %self.inner.name,
            project = %item.project.name(),
            priority,
            position,
            condition = %item.request.condition(),
            "integration queued"
        );
        state.waiting.insert(
            position,
            WaitingItem {
                item,
                priority,
                ticket,
            },
        );

        self.inner.dispatch(&mut state);
        drop(state);

        project.notify_pending_state();
    }

    /// Snapshot of the queue: the active integration first (if any), then the
    /// waiting ones in the order they will be admitted.
    pub fn queued_integrations(&self) -> Vec<QueuedIntegration> {
        let state = self.inner.lock();
        state
            .active
            .iter()
            .map(|active| active.view.clone())
            .chain(state.waiting.iter().map(|waiting| waiting.view(false)))
            .collect()
    }

    /// Snapshot of the waiting integrations only, in admission order.
    pub fn pending_integrations(&self) -> Vec<QueuedIntegration> {
        let state = self.inner.lock();
        state
            .waiting
            .iter()
            .map(|waiting| waiting.view(false))
            .collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            name: self.inner.name.clone(),
            integrations: self.queued_integrations(),
        }
    }

    /// True while an integration holds the queue.
    pub fn is_busy(&self) -> bool {
        self.inner.lock().active.is_some()
    }

    /// Remove every waiting item matching `predicate` without running it.
    /// The active item is never touched. Returns how many were removed.
    pub fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&IntegrationQueueItem) -> bool,
    {
        let removed: Vec<WaitingItem> = {
            let mut state = self.inner.lock();
            let (removed, kept) = std::mem::take(&mut state.waiting)
                .into_iter()
                .partition(|waiting| predicate(&waiting.item));
            state.waiting = kept;
            removed
        };

        for waiting in &removed {
            info!(
                queue = %self.inner.name,
                project = %waiting.item.project.name(),
                "pending integration cancelled"
            );
        }
        removed.len()
    }

    /// Remove the waiting items enqueued by `integrator`.
    pub fn remove_pending_requests(&self, integrator: IntegratorId) -> usize {
        self.remove_where(|item| item.integrator == integrator)
    }

    /// Remove the waiting items for the project named `project`.
    pub fn remove_project(&self, project: &str) -> usize {
        self.remove_where(|item| item.project.name() == project)
    }
}
