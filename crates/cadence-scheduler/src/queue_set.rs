//! Registry of named integration queues.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::{IntegrationQueue, QueueSnapshot};

/// Queues by name, created on demand.
#[derive(Debug, Default)]
pub struct IntegrationQueueSet {
    queues: RwLock<BTreeMap<String, IntegrationQueue>>,
}

impl IntegrationQueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the queue called `name`, creating it on first use.
    ///
    /// Adding an existing name returns the existing queue.
    pub fn add(&self, name: &str) -> IntegrationQueue {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(queue = %name, "created integration queue");
                IntegrationQueue::new(name)
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<IntegrationQueue> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Like [`get`](Self::get), but an unknown name is a configuration fault.
    pub fn queue(&self, name: &str) -> SchedulerResult<IntegrationQueue> {
        self.get(name)
            .ok_or_else(|| SchedulerError::UnknownQueue(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queues.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot every queue, ordered by queue name.
    pub fn snapshots(&self) -> Vec<QueueSnapshot> {
        let queues: Vec<IntegrationQueue> = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        queues.iter().map(IntegrationQueue::snapshot).collect()
    }
}
