//! Recording fakes for scheduler tests.
//!
//! Every call the scheduler makes into a fake project or trigger lands in a
//! shared [`EventLog`], which tests can wait on to observe call order.

use async_trait::async_trait;
use cadence_core::{
    BuildCondition, Error, Integratable, IntegrationRequest, IntegrationResult,
    IntegrationStatus, Result, Trigger,
};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Fire(String),
    Pending(String),
    Integrate(String, BuildCondition),
    Sleeping(String),
    Completed(String),
}

#[derive(Clone)]
pub struct EventLog {
    tx: Arc<watch::Sender<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self { tx: Arc::new(tx) }
    }

    pub fn push(&self, event: Event) {
        self.tx.send_modify(|events| events.push(event));
    }

    pub fn events(&self) -> Vec<Event> {
        self.tx.borrow().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.tx.borrow().iter().filter(|e| *e == event).count()
    }

    /// Wait until `predicate` holds for the recorded events.
    pub async fn wait_for<F>(&self, mut predicate: F)
    where
        F: FnMut(&[Event]) -> bool,
    {
        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(WAIT_LIMIT, async {
            let _ = rx.wait_for(|events| predicate(events)).await;
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting; events: {:?}", self.events());
    }

    pub async fn wait_for_count(&self, event: Event, n: usize) {
        self.wait_for(|events| events.iter().filter(|e| **e == event).count() >= n)
            .await;
    }
}

/// Tracks how many calls are inside a section at once.
#[derive(Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(self: &Arc<Self>) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        ProbeGuard(Arc::clone(self))
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

struct ProbeGuard(Arc<ConcurrencyProbe>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Trigger that replays a script of poll results, then reports nothing.
pub struct ScriptedTrigger {
    project: String,
    log: EventLog,
    script: Mutex<VecDeque<Option<IntegrationRequest>>>,
    gate: Option<Arc<Semaphore>>,
    fires: Arc<ConcurrencyProbe>,
    panics: bool,
}

impl ScriptedTrigger {
    pub fn fire_probe(&self) -> &Arc<ConcurrencyProbe> {
        &self.fires
    }

    /// Let `n` blocked `fire` calls return.
    pub fn release_fires(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }
}

#[async_trait]
impl Trigger for ScriptedTrigger {
    async fn fire(&self) -> Option<IntegrationRequest> {
        self.log.push(Event::Fire(self.project.clone()));
        let _inside = self.fires.enter();
        if self.panics {
            panic!("{} trigger exploded", self.project);
        }
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.script.lock().unwrap().pop_front().flatten()
    }

    fn integration_completed(&self) {
        self.log.push(Event::Completed(self.project.clone()));
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    Succeed,
    Fail,
    Panic,
    /// Wait for [`FakeProject::release`] before succeeding.
    Block,
    /// Give up with `Error::Cancelled`.
    GiveUp,
}

pub struct FakeProject {
    name: String,
    queue: String,
    priority: i32,
    trigger: Arc<ScriptedTrigger>,
    log: EventLog,
    behaviour: Behaviour,
    delay: Duration,
    gate: Semaphore,
    probe: Arc<ConcurrencyProbe>,
    requests: Mutex<Vec<IntegrationRequest>>,
}

impl FakeProject {
    pub fn builder(name: &str, log: &EventLog) -> FakeProjectBuilder {
        FakeProjectBuilder {
            name: name.to_string(),
            queue: name.to_string(),
            priority: 0,
            log: log.clone(),
            behaviour: Behaviour::Succeed,
            delay: Duration::ZERO,
            script: Vec::new(),
            blocking_fire: false,
            panicking_fire: false,
            probe: None,
        }
    }

    pub fn scripted_trigger(&self) -> &Arc<ScriptedTrigger> {
        &self.trigger
    }

    pub fn requests(&self) -> Vec<IntegrationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn probe(&self) -> &Arc<ConcurrencyProbe> {
        &self.probe
    }

    /// Let `n` blocked integrations finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl Integratable for FakeProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn queue_priority(&self) -> i32 {
        self.priority
    }

    fn trigger(&self) -> Arc<dyn Trigger> {
        self.trigger.clone()
    }

    async fn integrate(&self, request: &IntegrationRequest) -> Result<IntegrationResult> {
        let started_at = Utc::now();
        self.log
            .push(Event::Integrate(self.name.clone(), request.condition()));
        self.requests.lock().unwrap().push(request.clone());
        let _inside = self.probe.enter();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.behaviour {
            Behaviour::Succeed => {}
            Behaviour::Fail => {
                return Err(Error::IntegrationFailed(format!("{} broke", self.name)));
            }
            Behaviour::Panic => panic!("{} exploded", self.name),
            Behaviour::GiveUp => return Err(Error::Cancelled),
            Behaviour::Block => {
                if let Ok(permit) = self.gate.acquire().await {
                    permit.forget();
                }
            }
        }

        Ok(IntegrationResult::finished(
            &self.name,
            request.clone(),
            IntegrationStatus::Success,
            started_at,
        ))
    }

    fn notify_pending_state(&self) {
        self.log.push(Event::Pending(self.name.clone()));
    }

    fn notify_sleeping_state(&self) {
        self.log.push(Event::Sleeping(self.name.clone()));
    }
}

pub struct FakeProjectBuilder {
    name: String,
    queue: String,
    priority: i32,
    log: EventLog,
    behaviour: Behaviour,
    delay: Duration,
    script: Vec<Option<IntegrationRequest>>,
    blocking_fire: bool,
    panicking_fire: bool,
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl FakeProjectBuilder {
    pub fn queue(mut self, queue: &str) -> Self {
        self.queue = queue.to_string();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn behaviour(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Poll results the trigger returns, in order.
    pub fn script(mut self, script: Vec<Option<IntegrationRequest>>) -> Self {
        self.script = script;
        self
    }

    /// Make every `fire` call wait for [`ScriptedTrigger::release_fires`].
    pub fn blocking_fire(mut self) -> Self {
        self.blocking_fire = true;
        self
    }

    /// Make every `fire` call panic.
    pub fn panicking_fire(mut self) -> Self {
        self.panicking_fire = true;
        self
    }

    /// Share a concurrency probe across projects.
    pub fn probe(mut self, probe: &Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe.clone());
        self
    }

    pub fn build(self) -> Arc<FakeProject> {
        let trigger = Arc::new(ScriptedTrigger {
            project: self.name.clone(),
            log: self.log.clone(),
            script: Mutex::new(self.script.into()),
            gate: self.blocking_fire.then(|| Arc::new(Semaphore::new(0))),
            fires: ConcurrencyProbe::new(),
            panics: self.panicking_fire,
        });

        Arc::new(FakeProject {
            name: self.name,
            queue: self.queue,
            priority: self.priority,
            trigger,
            log: self.log,
            behaviour: self.behaviour,
            delay: self.delay,
            gate: Semaphore::new(0),
            probe: self.probe.unwrap_or_else(ConcurrencyProbe::new),
            requests: Mutex::new(Vec::new()),
        })
    }
}

/// A request as a trigger would produce it.
pub fn fired(source: &str) -> Option<IntegrationRequest> {
    Some(IntegrationRequest::new(
        BuildCondition::IfModificationExists,
        source,
    ))
}
